use std::{fmt, path::PathBuf};

/// 一次引导调用最终选中的连接目标。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 端点解析器把 `{host, port, unix_socket, url}` 归一化为本枚举，传输构建器只需按变体分派，
///   无需再关心多个配置来源的优先级。
///
/// ## 契约（What）
/// - `Tcp`：主机名（或 IP 字面量，IPv6 不带方括号）与端口；端口 `0` 仅对监听端有意义，表示临时端口；
/// - `Unix`：本地文件系统路径；
/// - 两个变体互斥，构造后即被消费，不在引导层之外保留。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP 主机与端口。
    Tcp { host: String, port: u16 },
    /// Unix Domain Socket 路径。
    Unix { path: PathBuf },
}

impl Endpoint {
    /// 以主机与端口构造 TCP 端点。
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// 以路径构造 Unix 端点。
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// 是否为 Unix Domain Socket 端点。
    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix { .. })
    }

    /// 介质标识，用于日志字段。
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Unix { .. } => "unix",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}
