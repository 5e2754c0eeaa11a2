//! 服务端工厂：解析端点、绑定监听、绑定处理器，打包为尚未启动的 [`ServerDescriptor`]。
//!
//! # 设计动机（Why）
//! - 绑定与监听失败在构造阶段立即暴露，接受连接交给外部的 accept-loop（见 [`crate::runtime`]）；
//! - 处理器与工厂都是不可变的共享值，连接之间不共享可变状态。
//!
//! # 契约（What）
//! - [`make_server`] 不接受任何连接；
//! - TLS 仅由 `certfile`（可选 `keyfile`）启用，服务端只认证自身；
//! - Unix 端点忽略 TLS 参数并上报诊断。

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;
use spark_rpc_protocol::{MessageHeader, MessageType, Protocol, TType};
use spark_rpc_transport::{DEFAULT_TIMEOUT, Endpoint, ServerSocket, tls::TlsServerMaterial};
use tracing::{info, warn};

use crate::{
    BootstrapError, ConfigurationError, ProcessError,
    client::{DEFAULT_HOST, DEFAULT_PORT},
    diagnostics::{DiagnosticReporter, TracingReporter},
    endpoint::{EndpointRequest, SERVER_REQUIREMENT, resolve},
    stack::ProtocolStack,
};

/// 处理一条入站消息。
///
/// 每次调用读取恰好一条请求并写出（若需要）对应的应答；同一个处理器被所有连接线程共享。
pub trait Processor: Send + Sync {
    /// 处理一条消息。
    fn process(&self, protocol: &mut dyn Protocol) -> Result<(), ProcessError>;
}

/// 服务契约的业务实现。
///
/// # 契约（What）
/// - 消息头已由处理器读出，`handle` 负责读取参数、调用 `read_message_end` 并写出应答；
/// - 不认识方法时在读取参数之前返回 [`ProcessError::UnknownMethod`]，处理器会跳过参数并回写
///   异常应答；
/// - 参数读取完毕后的业务失败返回 [`ProcessError::Handler`]，处理器回写内部错误应答。
pub trait Handler<S>: Send + Sync {
    /// 处理一次调用。
    fn handle(
        &self,
        service: &S,
        call: &MessageHeader,
        protocol: &mut dyn Protocol,
    ) -> Result<(), ProcessError>;
}

/// 异常应答中的错误类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplicationErrorKind {
    Unknown = 0,
    UnknownMethod = 1,
    InternalError = 6,
}

impl ApplicationErrorKind {
    /// 从线上的 `i32` 还原，未知取值归为 `Unknown`。
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ApplicationErrorKind::UnknownMethod,
            6 => ApplicationErrorKind::InternalError,
            _ => ApplicationErrorKind::Unknown,
        }
    }
}

/// 框架层异常应答：字段 1 为消息，字段 2 为错误类别。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationError {
    pub kind: ApplicationErrorKind,
    pub message: String,
}

impl ApplicationError {
    /// 以 `Exception` 类型、沿用请求序号写出完整应答消息。
    pub fn write_reply(
        &self,
        protocol: &mut dyn Protocol,
        call: &MessageHeader,
    ) -> Result<(), ProcessError> {
        protocol.write_message_begin(&MessageHeader::new(
            call.name.clone(),
            MessageType::Exception,
            call.seqid,
        ))?;
        protocol.write_struct_begin("ApplicationError")?;
        protocol.write_field_begin("message", TType::String, 1)?;
        protocol.write_string(&self.message)?;
        protocol.write_field_end()?;
        protocol.write_field_begin("type", TType::I32, 2)?;
        protocol.write_i32(self.kind as i32)?;
        protocol.write_field_end()?;
        protocol.write_field_stop()?;
        protocol.write_struct_end()?;
        protocol.write_message_end()?;
        protocol.flush()?;
        Ok(())
    }

    /// 读取异常应答的结构体部分（消息头之后）。
    pub fn read(protocol: &mut dyn Protocol) -> Result<Self, ProcessError> {
        let mut error = ApplicationError {
            kind: ApplicationErrorKind::Unknown,
            message: String::new(),
        };
        protocol.read_struct_begin()?;
        loop {
            let field = protocol.read_field_begin()?;
            if field.is_stop() {
                break;
            }
            match (field.id, field.ttype) {
                (1, TType::String) => error.message = protocol.read_string()?,
                (2, TType::I32) => error.kind = ApplicationErrorKind::from_i32(protocol.read_i32()?),
                (_, other) => protocol.skip(other)?,
            }
            protocol.read_field_end()?;
        }
        protocol.read_struct_end()?;
        Ok(error)
    }
}

/// 把服务契约与业务实现绑定为 [`Processor`]。
pub struct ServiceProcessor<S, H> {
    service: Arc<S>,
    handler: H,
}

impl<S, H> ServiceProcessor<S, H> {
    pub fn new(service: Arc<S>, handler: H) -> Self {
        Self { service, handler }
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}

impl<S, H> Processor for ServiceProcessor<S, H>
where
    S: Send + Sync,
    H: Handler<S>,
{
    fn process(&self, protocol: &mut dyn Protocol) -> Result<(), ProcessError> {
        let call = protocol.read_message_begin()?;
        let failure = match self.handler.handle(&self.service, &call, protocol) {
            Ok(()) => return Ok(()),
            Err(ProcessError::UnknownMethod(method)) => {
                protocol.skip(TType::Struct)?;
                protocol.read_message_end()?;
                ApplicationError {
                    kind: ApplicationErrorKind::UnknownMethod,
                    message: format!("unknown method `{method}`"),
                }
            }
            Err(ProcessError::Handler(detail)) => ApplicationError {
                kind: ApplicationErrorKind::InternalError,
                message: detail,
            },
            Err(err) => return Err(err),
        };
        warn!(method = %call.name, seqid = call.seqid, error = %failure.message, "call failed");
        if call.kind == MessageType::Oneway {
            return Ok(());
        }
        failure.write_reply(protocol, &call)
    }
}

/// 服务端构造参数。
///
/// 时长在配置文档中以毫秒书写（`client_timeout_ms`）。
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    #[serde(rename = "client_timeout_ms", deserialize_with = "crate::config::millis")]
    pub client_timeout: Option<Duration>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    #[serde(skip)]
    pub stack: ProtocolStack,
    #[serde(skip)]
    pub reporter: Arc<dyn DiagnosticReporter>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: Some(DEFAULT_HOST.to_owned()),
            port: Some(DEFAULT_PORT),
            unix_socket: None,
            client_timeout: Some(DEFAULT_TIMEOUT),
            certfile: None,
            keyfile: None,
            stack: ProtocolStack::default(),
            reporter: Arc::new(TracingReporter),
        }
    }
}

impl ServerOptions {
    /// 监听 `host:port`；端口 `0` 表示由系统分配。
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    /// 监听 Unix Domain Socket。
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            unix_socket: Some(path.into()),
            ..Self::default()
        }
    }

    /// 从 TOML 文档解析；未出现的字段取默认值。
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(document)?)
    }

    /// 每条接入连接的读写超时；空闲超过该时长的连接会被关闭。
    pub fn with_client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// 服务端证书链（PEM），设置后 TCP 端点启用 TLS。
    pub fn with_certfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.certfile = Some(path.into());
        self
    }

    /// 服务端私钥（PEM）；缺省时从证书文件中读取。
    pub fn with_keyfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.keyfile = Some(path.into());
        self
    }

    /// 替换每条连接的传输层与协议层组装方式。
    pub fn with_stack(mut self, stack: ProtocolStack) -> Self {
        self.stack = stack;
        self
    }

    /// 诊断事件的接收者。
    pub fn with_reporter(mut self, reporter: Arc<dyn DiagnosticReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn tls_supplied(&self) -> bool {
        self.certfile.is_some() || self.keyfile.is_some()
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("unix_socket", &self.unix_socket)
            .field("client_timeout", &self.client_timeout)
            .field("certfile", &self.certfile)
            .field("keyfile", &self.keyfile)
            .finish_non_exhaustive()
    }
}

/// 已绑定监听、尚未开始接受连接的服务端。
///
/// 独占监听套接字，不持有任何连接；交给运行时后由运行时负责每条连接的生命周期。
pub struct ServerDescriptor {
    pub(crate) socket: ServerSocket,
    pub(crate) processor: Arc<dyn Processor>,
    pub(crate) stack: ProtocolStack,
}

impl ServerDescriptor {
    /// 实际监听的端点。
    pub fn local_endpoint(&self) -> &Endpoint {
        self.socket.local_endpoint()
    }

    /// 接入连接是否走 TLS。
    pub fn is_tls(&self) -> bool {
        self.socket.is_tls()
    }

    /// 接入连接的 I/O 超时。
    pub fn client_timeout(&self) -> Option<Duration> {
        self.socket.client_timeout()
    }

    /// 分发请求的处理器。
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    /// 每条连接使用的协议栈。
    pub fn stack(&self) -> &ProtocolStack {
        &self.stack
    }

    /// 拆分为监听套接字、处理器与协议栈，供自定义运行时使用。
    pub fn into_parts(self) -> (ServerSocket, Arc<dyn Processor>, ProtocolStack) {
        (self.socket, self.processor, self.stack)
    }
}

impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("endpoint", self.local_endpoint())
            .field("tls", &self.is_tls())
            .finish_non_exhaustive()
    }
}

/// 以服务契约与业务实现构造服务端。
pub fn make_server<S, H>(
    service: Arc<S>,
    handler: H,
    options: &ServerOptions,
) -> Result<ServerDescriptor, BootstrapError>
where
    S: Send + Sync + 'static,
    H: Handler<S> + 'static,
{
    make_server_with(Arc::new(ServiceProcessor::new(service, handler)), options)
}

/// 以现成的处理器构造服务端。
pub fn make_server_with(
    processor: Arc<dyn Processor>,
    options: &ServerOptions,
) -> Result<ServerDescriptor, BootstrapError> {
    let request = EndpointRequest {
        host: options.host.as_deref(),
        port: options.port,
        unix_socket: options.unix_socket.as_deref(),
        url: None,
    };
    let endpoint = resolve(
        &request,
        options.tls_supplied(),
        options.reporter.as_ref(),
        SERVER_REQUIREMENT,
    )?;

    let tls = match (&endpoint, &options.certfile) {
        (Endpoint::Tcp { .. }, Some(certfile)) => Some(
            TlsServerMaterial {
                certfile: certfile.clone(),
                keyfile: options.keyfile.clone(),
            }
            .server_config()?,
        ),
        _ => None,
    };

    let socket = ServerSocket::listen(&endpoint, options.client_timeout, tls)?;
    info!(
        endpoint = %socket.local_endpoint(),
        tls = socket.is_tls(),
        "server bound"
    );
    Ok(ServerDescriptor {
        socket,
        processor,
        stack: options.stack.clone(),
    })
}
