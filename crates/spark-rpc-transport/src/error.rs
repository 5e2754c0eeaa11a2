use std::{fmt, io, path::PathBuf};

use rustls::{AlertDescription, Error as RustlsError};
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.rpc.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "spark.rpc.transport.tcp.resolve_failed",
    message: "tcp resolve",
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.rpc.transport.bind_failed",
    message: "bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.rpc.transport.accept_failed",
    message: "accept",
};
pub(crate) const UNIX_CONNECT: OperationKind = OperationKind {
    code: "spark.rpc.transport.unix.connect_failed",
    message: "unix connect",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.rpc.transport.configure_failed",
    message: "socket configure",
};
pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "spark.rpc.transport.tls.handshake_failed",
    message: "tls handshake",
};
pub(crate) const TLS_CONFIG: OperationKind = OperationKind {
    code: "spark.rpc.transport.tls.config_invalid",
    message: "tls config",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.rpc.transport.read_failed",
    message: "read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.rpc.transport.write_failed",
    message: "write",
};
pub(crate) const FLUSH: OperationKind = OperationKind {
    code: "spark.rpc.transport.flush_failed",
    message: "flush",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "spark.rpc.transport.shutdown_failed",
    message: "shutdown",
};

const TLS_MATERIAL_CODE: &str = "spark.rpc.transport.tls.material_invalid";
const NOT_OPEN_CODE: &str = "spark.rpc.transport.not_open";
const END_OF_STREAM_CODE: &str = "spark.rpc.transport.end_of_stream";

/// 失败的粗粒度分类，供上层决定是否重试或告警。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 建连或 I/O 超过了配置的超时。
    Timeout,
    /// 瞬时故障，例如连接被拒绝或被重置。
    Retryable,
    /// 证书校验、握手违规等安全类失败。
    Security,
    /// 配置或权限类失败，重试无意义。
    NonRetryable,
}

/// 传输构建与读写阶段的错误域。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方需要看到原始故障（连接被拒绝、证书校验失败、权限不足），因此 `Io` 与 `Tls`
///   变体原样保留底层错误作为 `source`；
/// - 稳定错误码（[`TransportError::code`]）让日志与测试不依赖底层库的文案。
///
/// ## 契约（What）
/// - `Io`：套接字层失败，`kind` 指明失败的操作；
/// - `Tls`：握手或记录层失败，来源为 `rustls::Error`；
/// - `TlsMaterial`：证书、私钥或 CA 文件无法读取或解析；
/// - `NotOpen`：在未打开（或已关闭）的传输上执行 I/O；
/// - `EndOfStream`：对端关闭连接，而调用方仍期待更多字节。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{kind}: {source}")]
    Io {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },
    #[error("{kind}: {source}")]
    Tls {
        kind: OperationKind,
        #[source]
        source: RustlsError,
    },
    #[error("tls material `{}` is unusable: {detail}", path.display())]
    TlsMaterial { path: PathBuf, detail: String },
    #[error("{kind} requires an open transport")]
    NotOpen { kind: OperationKind },
    #[error("{kind}: peer closed the stream")]
    EndOfStream { kind: OperationKind },
}

impl TransportError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Io { kind, .. } | TransportError::Tls { kind, .. } => kind.code,
            TransportError::TlsMaterial { .. } => TLS_MATERIAL_CODE,
            TransportError::NotOpen { .. } => NOT_OPEN_CODE,
            TransportError::EndOfStream { .. } => END_OF_STREAM_CODE,
        }
    }

    /// 错误分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::Io { source, .. } => categorize_io_error(source),
            TransportError::Tls { source, .. } => categorize_rustls_error(source),
            TransportError::TlsMaterial { .. } => ErrorCategory::NonRetryable,
            TransportError::NotOpen { .. } => ErrorCategory::NonRetryable,
            TransportError::EndOfStream { .. } => ErrorCategory::Retryable,
        }
    }

    /// 是否由超时触发。
    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    /// 底层 `io::ErrorKind`（若存在）。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            TransportError::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// 将 IO 错误映射为 [`TransportError::Io`]。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> TransportError {
    TransportError::Io {
        kind,
        source: error,
    }
}

/// 将可能嵌套 `rustls::Error` 的 IO 错误拆解为 TLS 或 IO 变体。
///
/// `rustls::StreamOwned` 把协议错误包装成 `InvalidData` 的 `io::Error`，这里取回原始错误，
/// 以便调用方区分证书校验失败与网络故障。
pub(crate) fn map_tls_io_error(kind: OperationKind, error: io::Error) -> TransportError {
    if let Some(source) = error.get_ref()
        && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
    {
        return TransportError::Tls {
            kind,
            source: rustls_error.clone(),
        };
    }
    map_io_error(kind, error)
}

pub(crate) fn map_rustls_error(kind: OperationKind, error: RustlsError) -> TransportError {
    TransportError::Tls {
        kind,
        source: error,
    }
}

pub(crate) fn tls_material_error(
    path: impl Into<PathBuf>,
    detail: impl fmt::Display,
) -> TransportError {
    TransportError::TlsMaterial {
        path: path.into(),
        detail: detail.to_string(),
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        // 阻塞套接字上的 `WouldBlock` 只会由读写超时产生。
        ErrorKind::TimedOut | ErrorKind::WouldBlock => ErrorCategory::Timeout,
        ErrorKind::Interrupted
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => ErrorCategory::Retryable,
        ErrorKind::PermissionDenied | ErrorKind::Unsupported | ErrorKind::NotFound => {
            ErrorCategory::NonRetryable
        }
        _ => ErrorCategory::NonRetryable,
    }
}

fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    use RustlsError::*;
    match error {
        InvalidCertificate(_)
        | NoCertificatesPresented
        | InvalidCertRevocationList(_)
        | UnsupportedNameType
        | InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | PeerSentOversizedRecord
        | NoApplicationProtocol => ErrorCategory::Security,
        AlertReceived(alert) => alert_to_category(alert),
        PeerIncompatible(_) | HandshakeNotComplete => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

fn alert_to_category(alert: &AlertDescription) -> ErrorCategory {
    use AlertDescription::*;
    match alert {
        CloseNotify | UserCanceled => ErrorCategory::Retryable,
        _ => ErrorCategory::Security,
    }
}
