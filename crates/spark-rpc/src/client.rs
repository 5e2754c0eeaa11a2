//! 客户端工厂：解析端点、构建传输、组装协议栈并同步打开。
//!
//! # 设计动机（Why）
//! - [`make_client`] 只返回已经打开的客户端，失败时不会留下半初始化的对象；
//! - [`connect_scoped`] / [`with_client`] 是唯一带自动释放的路径：守卫在正常返回、
//!   提前返回与 panic 展开时都会关闭传输，且只关闭一次。
//!
//! # 流程（How）
//! 端点解析 → 超时合并 → TLS 材料加载（仅 TCP）→ [`Socket`] → 协议栈组装 → `open`。
//! 任一阶段失败立即返回，不重试。

use std::{
    fmt,
    ops::{Deref, DerefMut},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use rustls::ClientConfig;
use serde::Deserialize;
use spark_rpc_protocol::Protocol;
use spark_rpc_transport::{
    DEFAULT_TIMEOUT, Endpoint, Socket, TimeoutConfig, TransportError, tls::TlsClientMaterial,
};
use tracing::{debug, warn};

use crate::{
    BootstrapError, ConfigurationError,
    diagnostics::{DiagnosticReporter, TracingReporter},
    endpoint::{CLIENT_REQUIREMENT, EndpointRequest, resolve},
    stack::ProtocolStack,
    timeout::resolve_timeouts,
};

/// 默认主机。
pub const DEFAULT_HOST: &str = "localhost";
/// 默认端口。
pub const DEFAULT_PORT: u16 = 9090;

/// 客户端构造参数。
///
/// # 契约（What）
/// - `host` / `port` 默认为 `localhost:9090`；`url` 中出现的主机名与端口覆盖它们；
/// - `unix_socket` 优先于任何 TCP 参数，此时 TLS 参数被忽略并产生诊断；
/// - `cafile` 或 `tls_context` 存在时启用 TLS，`certfile` / `keyfile` 仅用于客户端认证；
/// - `timeout` 为已弃用的统一超时，存在时覆盖 `connect_timeout` 与 `socket_timeout`；
/// - 配置文档中的时长以毫秒书写：`connect_timeout_ms`、`socket_timeout_ms`、`timeout_ms`。
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    pub url: Option<String>,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "crate::config::millis")]
    pub connect_timeout: Option<Duration>,
    #[serde(rename = "socket_timeout_ms", deserialize_with = "crate::config::millis")]
    pub socket_timeout: Option<Duration>,
    #[serde(rename = "timeout_ms", deserialize_with = "crate::config::millis")]
    pub timeout: Option<Duration>,
    pub cafile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    #[serde(skip)]
    pub tls_context: Option<Arc<ClientConfig>>,
    #[serde(skip)]
    pub stack: ProtocolStack,
    #[serde(skip)]
    pub reporter: Arc<dyn DiagnosticReporter>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: Some(DEFAULT_HOST.to_owned()),
            port: Some(DEFAULT_PORT),
            unix_socket: None,
            url: None,
            connect_timeout: Some(DEFAULT_TIMEOUT),
            socket_timeout: Some(DEFAULT_TIMEOUT),
            timeout: None,
            cafile: None,
            certfile: None,
            keyfile: None,
            tls_context: None,
            stack: ProtocolStack::default(),
            reporter: Arc::new(TracingReporter),
        }
    }
}

impl ClientOptions {
    /// 连接 `host:port`。
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    /// 连接 Unix Domain Socket。
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

    /// 目标 URL；其中写出的主机名与端口覆盖 `host` / `port`。
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// 建连超时，覆盖全部候选地址与 TLS 握手；`None` 表示不限。
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 每次读写的超时；`None` 表示一直阻塞。
    pub fn with_socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// 已弃用的统一超时。
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 校验服务端证书所用的 CA 文件（PEM），设置后启用 TLS。
    pub fn with_cafile(mut self, path: impl Into<PathBuf>) -> Self {
        self.cafile = Some(path.into());
        self
    }

    /// 客户端证书链（PEM），用于双向认证；单独设置不会启用 TLS。
    pub fn with_certfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.certfile = Some(path.into());
        self
    }

    /// 客户端私钥（PEM）；缺省时从证书文件中读取。
    pub fn with_keyfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.keyfile = Some(path.into());
        self
    }

    /// 直接使用现成的 `ClientConfig`，此时忽略 CA、证书与私钥路径。
    pub fn with_tls_context(mut self, context: Arc<ClientConfig>) -> Self {
        self.tls_context = Some(context);
        self
    }

    /// 替换传输层与协议层的组装方式。
    pub fn with_stack(mut self, stack: ProtocolStack) -> Self {
        self.stack = stack;
        self
    }

    /// 诊断事件（弃用字段、被忽略的 TLS 材料等）的接收者。
    pub fn with_reporter(mut self, reporter: Arc<dyn DiagnosticReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// 本配置携带的 TLS 材料。
    pub fn tls_material(&self) -> TlsClientMaterial {
        TlsClientMaterial {
            cafile: self.cafile.clone(),
            certfile: self.certfile.clone(),
            keyfile: self.keyfile.clone(),
            context: self.tls_context.clone(),
        }
    }

    fn endpoint_request(&self) -> EndpointRequest<'_> {
        EndpointRequest {
            host: self.host.as_deref(),
            port: self.port,
            unix_socket: self.unix_socket.as_deref(),
            url: self.url.as_deref(),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("unix_socket", &self.unix_socket)
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .field("timeout", &self.timeout)
            .field("cafile", &self.cafile)
            .field("certfile", &self.certfile)
            .field("keyfile", &self.keyfile)
            .field("tls_context", &self.tls_context.is_some())
            .finish_non_exhaustive()
    }
}

/// 已打开的 RPC 客户端。
///
/// 独占其协议句柄（句柄独占传输）；`close` 幂等。通过 [`make_client`] 得到的实例需要调用方
/// 显式关闭。
pub struct Client<S> {
    service: Arc<S>,
    protocol: Box<dyn Protocol>,
    endpoint: Endpoint,
    timeouts: TimeoutConfig,
    tls: bool,
    closed: bool,
}

impl<S> Client<S> {
    /// 服务契约。
    pub fn service(&self) -> &S {
        &self.service
    }

    /// 服务契约的共享句柄。
    pub fn service_handle(&self) -> Arc<S> {
        Arc::clone(&self.service)
    }

    /// 协议句柄。
    pub fn protocol(&mut self) -> &mut dyn Protocol {
        self.protocol.as_mut()
    }

    /// 连接目标。
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 生效的超时。
    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    /// 是否经由 TLS 连接。
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// 底层连接是否仍然打开。
    pub fn is_open(&self) -> bool {
        !self.closed && self.protocol.transport_ref().is_open()
    }

    /// 关闭传输；重复调用不会再次触达传输。
    pub fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.protocol.transport().close();
        debug!(endpoint = %self.endpoint, "client closed");
        result
    }
}

impl<S> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("timeouts", &self.timeouts)
            .field("tls", &self.tls)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// 构造并同步打开客户端。
///
/// # 契约（What）
/// - 配置错误在任何 I/O 之前返回；
/// - 建连受 `connect_timeout` 约束，连接被拒绝、超时与 TLS 握手失败都从这里返回；
/// - 成功时恰好建立一条连接。
pub fn make_client<S>(
    service: Arc<S>,
    options: &ClientOptions,
) -> Result<Client<S>, BootstrapError> {
    let reporter = options.reporter.as_ref();
    let material = options.tls_material();
    let endpoint = resolve(
        &options.endpoint_request(),
        material.is_supplied(),
        reporter,
        CLIENT_REQUIREMENT,
    )?;
    let timeouts = resolve_timeouts(
        options.timeout,
        options.socket_timeout,
        options.connect_timeout,
        reporter,
    );
    let tls = if endpoint.is_unix() {
        None
    } else {
        material.client_config()?
    };

    let socket = Socket::new(endpoint.clone(), timeouts, tls);
    let tls = socket.is_tls();
    let mut protocol = options.stack.assemble(Box::new(socket));
    protocol.transport().open()?;
    debug!(endpoint = %endpoint, tls, "client connected");

    Ok(Client {
        service,
        protocol,
        endpoint,
        timeouts,
        tls,
        closed: false,
    })
}

/// 作用域内的客户端：离开作用域时关闭传输。
///
/// 解引用为 [`Client`]。需要观察关闭错误时调用 [`ClientGuard::release`]。
pub struct ClientGuard<S> {
    client: Client<S>,
}

impl<S> ClientGuard<S> {
    /// 结束托管并返回关闭结果。
    pub fn release(mut self) -> Result<(), TransportError> {
        self.client.close()
    }
}

impl<S> Deref for ClientGuard<S> {
    type Target = Client<S>;

    fn deref(&self) -> &Client<S> {
        &self.client
    }
}

impl<S> DerefMut for ClientGuard<S> {
    fn deref_mut(&mut self) -> &mut Client<S> {
        &mut self.client
    }
}

impl<S> Drop for ClientGuard<S> {
    fn drop(&mut self) {
        if let Err(err) = self.client.close() {
            warn!(
                endpoint = %self.client.endpoint,
                code = err.code(),
                error = %err,
                "scoped client close failed"
            );
        }
    }
}

impl<S> fmt::Debug for ClientGuard<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientGuard").field(&self.client).finish()
    }
}

/// 构造客户端并交给守卫托管。
pub fn connect_scoped<S>(
    service: Arc<S>,
    options: &ClientOptions,
) -> Result<ClientGuard<S>, BootstrapError> {
    make_client(service, options).map(|client| ClientGuard { client })
}

/// 获取 → 使用 → 释放。
///
/// `body` 返回错误或 panic 时传输同样会被关闭；`body` 成功时关闭错误会被返回。
pub fn with_client<S, R, E, F>(service: Arc<S>, options: &ClientOptions, body: F) -> Result<R, E>
where
    F: FnOnce(&mut Client<S>) -> Result<R, E>,
    E: From<BootstrapError>,
{
    let mut guard = connect_scoped(service, options)?;
    let value = body(&mut guard)?;
    guard
        .release()
        .map_err(|err| E::from(BootstrapError::Transport(err)))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{CollectingReporter, Diagnostic};

    #[test]
    fn defaults_target_localhost_9090() {
        let options = ClientOptions::default();
        assert_eq!(options.host.as_deref(), Some("localhost"));
        assert_eq!(options.port, Some(9090));
        assert_eq!(options.connect_timeout, Some(Duration::from_millis(3000)));
        assert_eq!(options.socket_timeout, Some(Duration::from_millis(3000)));
        assert!(options.timeout.is_none());
    }

    #[test]
    fn toml_document_overrides_defaults() {
        let options = ClientOptions::from_toml_str(
            r#"
            url = "thrift://rpc.internal:7000"
            connect_timeout_ms = 250
            timeout_ms = 5000
            cafile = "/etc/spark/ca.pem"
            "#,
        )
        .unwrap();
        assert_eq!(options.host.as_deref(), Some("localhost"));
        assert_eq!(options.url.as_deref(), Some("thrift://rpc.internal:7000"));
        assert_eq!(options.connect_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.socket_timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(options.timeout, Some(Duration::from_millis(5000)));
        assert!(options.tls_material().engages_tls());
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let err = ClientOptions::from_toml_str("hots = \"typo\"").unwrap_err();
        assert_eq!(err.code(), "spark.rpc.config.parse_failed");
    }

    #[test]
    fn missing_endpoint_fails_before_any_io() {
        let reporter = CollectingReporter::new();
        let options = ClientOptions {
            host: None,
            ..ClientOptions::default()
        }
        .with_timeout(Duration::from_secs(1))
        .with_reporter(Arc::new(reporter.clone()));
        let err = make_client(Arc::new(()), &options).unwrap_err();
        assert_eq!(err.to_string(), CLIENT_REQUIREMENT);
        assert!(err.as_transport().is_none());
        assert!(!reporter.contains(&Diagnostic::DeprecatedTimeout));
    }
}
