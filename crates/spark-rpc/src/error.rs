use spark_rpc_protocol::ProtocolError;
use spark_rpc_transport::TransportError;
use thiserror::Error;

/// 配置无法转换为有效端点。
///
/// # 契约（What）
/// - `MissingEndpoint`：既没有 Unix 路径也没有完整的 host/port，消息即缺失的要求本身；
/// - `InvalidUrl`：`url` 无法解析，保留 `url::ParseError`；
/// - `Parse`：TOML 配置文档不合法。
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{requirement}")]
    MissingEndpoint { requirement: &'static str },
    #[error("invalid url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid configuration document: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigurationError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConfigurationError::MissingEndpoint { .. } => "spark.rpc.config.missing_endpoint",
            ConfigurationError::InvalidUrl { .. } => "spark.rpc.config.invalid_url",
            ConfigurationError::Parse(_) => "spark.rpc.config.parse_failed",
        }
    }
}

/// 客户端与服务端工厂的失败。
///
/// 配置错误在任何 I/O 之前产生；传输错误保留底层故障（连接被拒绝、证书校验失败、权限不足）。
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BootstrapError {
    /// 稳定错误码，透传内层错误。
    pub fn code(&self) -> &'static str {
        match self {
            BootstrapError::Configuration(err) => err.code(),
            BootstrapError::Transport(err) => err.code(),
        }
    }

    /// 内层传输错误（若是）。
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            BootstrapError::Transport(err) => Some(err),
            BootstrapError::Configuration(_) => None,
        }
    }
}

/// 处理一条消息时的失败。
///
/// # 契约（What）
/// - `Protocol`：编解码或传输失败，连接随之终止；
/// - `UnknownMethod`：处理器不认识该方法，参数尚未被读取；
/// - `Handler`：业务处理失败，参数已被完整读取。
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    #[error("handler failed: {0}")]
    Handler(String),
}

impl From<TransportError> for ProcessError {
    fn from(err: TransportError) -> Self {
        ProcessError::Protocol(ProtocolError::Transport(err))
    }
}

impl ProcessError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ProcessError::Protocol(err) => err.code(),
            ProcessError::UnknownMethod(_) => "spark.rpc.process.unknown_method",
            ProcessError::Handler(_) => "spark.rpc.process.handler_failed",
        }
    }

    /// 对端在消息边界上关闭了连接，属于正常结束。
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ProcessError::Protocol(err) if err.is_end_of_stream())
    }
}
