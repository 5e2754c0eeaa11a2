//! 端点解析：把 `{host, port, unix_socket, url}` 归一为唯一的 [`Endpoint`]。
//!
//! # 设计动机（Why）
//! - 多个来源彼此重叠（URL 覆盖 host/port，Unix 路径压过 TCP），把优先级写成纯函数，
//!   可脱离 I/O 单独测试。
//!
//! # 优先级（How）
//! 1. `url` 非空时解析，其中实际出现的主机名与端口覆盖传入值；
//! 2. 设置了 Unix 路径 → [`Endpoint::Unix`]，若同时提供 TLS 材料则上报诊断；
//! 3. host 非空且 port 存在 → [`Endpoint::Tcp`]；
//! 4. 否则返回 [`ConfigurationError::MissingEndpoint`]，消息即调用方给出的要求描述。

use std::path::Path;

use spark_rpc_transport::Endpoint;
use tracing::debug;
use url::{Host, Url};

use crate::{
    ConfigurationError,
    diagnostics::{Diagnostic, DiagnosticReporter},
};

/// 客户端缺少端点时的提示。
pub const CLIENT_REQUIREMENT: &str = "either host/port, unix socket path, or URL must be provided";
/// 服务端缺少端点时的提示。
pub const SERVER_REQUIREMENT: &str = "either host/port or unix socket path must be provided";

/// 端点解析的输入；空字符串与空路径等同于未设置。
#[derive(Clone, Copy, Debug, Default)]
pub struct EndpointRequest<'a> {
    pub host: Option<&'a str>,
    pub port: Option<u16>,
    pub unix_socket: Option<&'a Path>,
    pub url: Option<&'a str>,
}

/// 以 `url` 中实际出现的主机名与端口覆盖 `host` / `port`。
///
/// IPv6 主机名去掉方括号返回。`url` 为空时原样返回输入。
/// 显式写出的端口总是生效，即使它等于该 scheme 的默认端口（如 `https://host:443`）。
pub fn apply_url_override(
    host: Option<&str>,
    port: Option<u16>,
    url: Option<&str>,
) -> Result<(Option<String>, Option<u16>), ConfigurationError> {
    let mut host = host.filter(|host| !host.is_empty()).map(str::to_owned);
    let mut port = port;
    let Some(raw) = url.filter(|url| !url.is_empty()) else {
        return Ok((host, port));
    };

    let parsed = Url::parse(raw).map_err(|source| ConfigurationError::InvalidUrl {
        url: raw.to_owned(),
        source,
    })?;
    match parsed.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => host = Some(domain.to_owned()),
        Some(Host::Ipv4(addr)) => host = Some(addr.to_string()),
        Some(Host::Ipv6(addr)) => host = Some(addr.to_string()),
        _ => {}
    }
    if has_explicit_port(raw)
        && let Some(explicit) = parsed.port_or_known_default()
    {
        port = Some(explicit);
    }
    Ok((host, port))
}

/// 原始文本的 authority 部分是否写出了端口。
///
/// `Url::port` 会把等于默认端口的显式端口折叠为 `None`，因此直接检查原文。
fn has_explicit_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, tail)| tail);
    let after_host = match host_port.strip_prefix('[') {
        Some(bracketed) => bracketed.split_once(']').map_or("", |(_, tail)| tail),
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, digits)| !digits.is_empty())
}

/// 按固定优先级选出唯一端点。
///
/// `tls_supplied` 表示调用方提供了任何 TLS 材料；Unix 端点会忽略这些材料并上报
/// [`Diagnostic::TlsIgnoredForUnixSocket`]，构造继续进行。
pub fn resolve(
    request: &EndpointRequest<'_>,
    tls_supplied: bool,
    reporter: &dyn DiagnosticReporter,
    requirement: &'static str,
) -> Result<Endpoint, ConfigurationError> {
    let (host, port) = apply_url_override(request.host, request.port, request.url)?;

    let endpoint = if let Some(path) = request
        .unix_socket
        .filter(|path| !path.as_os_str().is_empty())
    {
        if tls_supplied {
            reporter.report(&Diagnostic::TlsIgnoredForUnixSocket {
                path: path.to_path_buf(),
            });
        }
        Endpoint::unix(path)
    } else if let (Some(host), Some(port)) = (host, port) {
        Endpoint::tcp(host, port)
    } else {
        return Err(ConfigurationError::MissingEndpoint { requirement });
    };

    debug!(endpoint = %endpoint, "endpoint resolved");
    Ok(endpoint)
}
