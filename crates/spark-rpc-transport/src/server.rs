use std::{io, net::TcpListener, path::PathBuf, sync::Arc, time::Duration};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

use rustls::{ServerConfig, ServerConnection, StreamOwned};
use tracing::{debug, warn};

use crate::{
    Endpoint, Result, Socket, TransportError,
    error::{ACCEPT, BIND, CONFIGURE, HANDSHAKE, map_io_error, map_rustls_error},
    socket::Stream,
    util::{bind_tcp, configure_tcp},
};

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// 已绑定并处于监听状态的服务端端点。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端工厂需要在构造阶段就暴露绑定/监听失败，因此 [`ServerSocket::listen`] 立即完成
///   `bind + listen`，而接受连接交给外部的 accept-loop。
///
/// ## 逻辑（How）
/// - TCP：`socket2` 设置 `SO_REUSEADDR` 后绑定第一个可用地址，backlog 为 128；
/// - Unix：路径已存在且是套接字文件时先尝试连接，连接被拒绝的残留文件会被删除，
///   仍在服务的路径返回 `AddrInUse`，不是套接字的文件返回 `AlreadyExists`；
/// - TLS：仅保存 `ServerConfig`，握手在连接首次读写时于该连接自己的线程中进行。
///
/// ## 契约（What）
/// - [`ServerSocket::accept`] 返回已打开的 [`Socket`]，其 I/O 超时为 `client_timeout`；
/// - [`ServerSocket::local_endpoint`] 返回实际绑定的端点（端口 `0` 会被替换为真实端口）；
/// - `close` 幂等，Unix 端点关闭时删除套接字文件；`Drop` 时自动关闭。
pub struct ServerSocket {
    endpoint: Endpoint,
    client_timeout: Option<Duration>,
    tls: Option<Arc<ServerConfig>>,
    listener: Option<Listener>,
    unix_path: Option<PathBuf>,
}

impl ServerSocket {
    /// 绑定并监听 `endpoint`。`tls` 对 Unix 端点无效。
    pub fn listen(
        endpoint: &Endpoint,
        client_timeout: Option<Duration>,
        tls: Option<Arc<ServerConfig>>,
    ) -> Result<Self> {
        let client_timeout = client_timeout.filter(|timeout| !timeout.is_zero());
        let (listener, local, unix_path, tls) = match endpoint {
            Endpoint::Tcp { host, port } => {
                let listener = bind_tcp(host, *port)?;
                let addr = listener
                    .local_addr()
                    .map_err(|err| map_io_error(BIND, err))?;
                (
                    Listener::Tcp(listener),
                    Endpoint::tcp(addr.ip().to_string(), addr.port()),
                    None,
                    tls,
                )
            }
            Endpoint::Unix { path } => {
                let listener = bind_unix(path)?;
                (listener, endpoint.clone(), Some(path.clone()), None)
            }
        };
        debug!(endpoint = %local, tls = tls.is_some(), "listener bound");
        Ok(Self {
            endpoint: local,
            client_timeout,
            tls,
            listener: Some(listener),
            unix_path,
        })
    }

    /// 实际绑定的端点。
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 接入连接是否走 TLS。
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// 接入连接的 I/O 超时。
    pub fn client_timeout(&self) -> Option<Duration> {
        self.client_timeout
    }

    /// 是否仍在监听。
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// 切换监听套接字的非阻塞模式，供轮询式 accept-loop 使用。
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let result = match self.listener()? {
            Listener::Tcp(listener) => listener.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Listener::Unix(listener) => listener.set_nonblocking(nonblocking),
        };
        result.map_err(|err| map_io_error(CONFIGURE, err))
    }

    /// 接受一个连接。非阻塞模式下没有待处理连接时返回 `WouldBlock` 类 IO 错误。
    pub fn accept(&self) -> Result<Socket> {
        match self.listener()? {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().map_err(|err| map_io_error(ACCEPT, err))?;
                // 部分平台上接入的套接字会继承监听端的非阻塞标志。
                stream
                    .set_nonblocking(false)
                    .map_err(|err| map_io_error(CONFIGURE, err))?;
                configure_tcp(&stream, self.client_timeout)?;
                let peer = Endpoint::tcp(peer.ip().to_string(), peer.port());
                let stream = match &self.tls {
                    Some(config) => {
                        let conn = ServerConnection::new(Arc::clone(config))
                            .map_err(|err| map_rustls_error(HANDSHAKE, err))?;
                        Stream::TlsServer(Box::new(StreamOwned::new(conn, stream)))
                    }
                    None => Stream::Tcp(stream),
                };
                debug!(peer = %peer, "connection accepted");
                Ok(Socket::accepted(peer, self.client_timeout, stream))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().map_err(|err| map_io_error(ACCEPT, err))?;
                stream
                    .set_nonblocking(false)
                    .map_err(|err| map_io_error(CONFIGURE, err))?;
                crate::util::set_unix_timeouts(&stream, self.client_timeout)?;
                debug!(endpoint = %self.endpoint, "connection accepted");
                Ok(Socket::accepted(
                    self.endpoint.clone(),
                    self.client_timeout,
                    Stream::Unix(stream),
                ))
            }
        }
    }

    /// 非阻塞 accept：没有待处理连接时返回 `Ok(None)`。
    pub fn poll_accept(&self) -> Result<Option<Socket>> {
        match self.accept() {
            Ok(socket) => Ok(Some(socket)),
            Err(err) if err.io_kind() == Some(io::ErrorKind::WouldBlock) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// 停止监听，可重复调用。
    pub fn close(&mut self) {
        if self.listener.take().is_none() {
            return;
        }
        if let Some(path) = self.unix_path.take()
            && let Err(err) = std::fs::remove_file(&path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %err, "failed to remove unix socket file");
        }
        debug!(endpoint = %self.endpoint, "listener closed");
    }

    fn listener(&self) -> Result<&Listener> {
        self.listener
            .as_ref()
            .ok_or(TransportError::NotOpen { kind: ACCEPT })
    }
}

impl Drop for ServerSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// 绑定 Unix 监听路径。
///
/// 已存在的路径只有在它是套接字文件且连接被拒绝（无人监听）时才会被删除重建；
/// 其余情形（普通文件、仍有人监听、连接出现其他错误）直接报错，不触碰文件。
#[cfg(unix)]
fn bind_unix(path: &std::path::Path) -> Result<Listener> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if !meta.file_type().is_socket() => {
            return Err(map_io_error(
                BIND,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("`{}` exists and is not a unix socket", path.display()),
                ),
            ));
        }
        Ok(_) => match UnixStream::connect(path) {
            Ok(_) => {
                return Err(map_io_error(
                    BIND,
                    io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("`{}` is already being served", path.display()),
                    ),
                ));
            }
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                debug!(path = %path.display(), "removing stale unix socket file");
                std::fs::remove_file(path).map_err(|err| map_io_error(BIND, err))?;
            }
            Err(err) => return Err(map_io_error(BIND, err)),
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(map_io_error(BIND, err)),
    }
    let listener = UnixListener::bind(path).map_err(|err| map_io_error(BIND, err))?;
    Ok(Listener::Unix(listener))
}

#[cfg(not(unix))]
fn bind_unix(_path: &std::path::Path) -> Result<Listener> {
    Err(map_io_error(
        BIND,
        io::Error::new(
            io::ErrorKind::Unsupported,
            "unix domain sockets are not available on this platform",
        ),
    ))
}
