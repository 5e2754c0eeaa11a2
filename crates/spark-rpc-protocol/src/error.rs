use spark_rpc_transport::TransportError;
use thiserror::Error;

/// 编解码阶段的错误域。
///
/// # 契约（What）
/// - `Transport`：底层读写失败，原样保留 [`TransportError`]；
/// - `BadVersion`：严格模式下消息头缺少版本标记或版本不匹配；
/// - `NegativeSize` / `SizeLimit`：长度前缀为负或超过配置上限；
/// - `InvalidData`：无法识别的类型标记、非 UTF-8 字符串、嵌套过深等；
/// - `UnknownMessageType`：消息类型不在 `1..=4` 内。
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// 传输层失败。
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// 版本标记缺失或不匹配。
    #[error("bad protocol version in message header: {0:#010x}")]
    BadVersion(u32),
    /// 负的长度或元素个数。
    #[error("negative size: {0}")]
    NegativeSize(i32),
    /// 长度超过上限。
    #[error("size {size} exceeds limit {limit}")]
    SizeLimit {
        /// 读到的长度。
        size: usize,
        /// 配置的上限。
        limit: usize,
    },
    /// 数据不合法。
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// 未知的消息类型。
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
}

impl ProtocolError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Transport(err) => err.code(),
            ProtocolError::BadVersion(_) => "spark.rpc.protocol.bad_version",
            ProtocolError::NegativeSize(_) => "spark.rpc.protocol.negative_size",
            ProtocolError::SizeLimit { .. } => "spark.rpc.protocol.size_limit",
            ProtocolError::InvalidData(_) => "spark.rpc.protocol.invalid_data",
            ProtocolError::UnknownMessageType(_) => "spark.rpc.protocol.unknown_message_type",
        }
    }

    /// 对端在消息边界之前关闭了连接。
    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(TransportError::EndOfStream { .. })
        )
    }
}
