use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    sync::Arc,
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use rustls::{ClientConfig, ClientConnection, ServerConnection, StreamOwned};
use rustls_pki_types::ServerName;
use tracing::debug;

use crate::{
    Endpoint, OperationKind, Result, TimeoutConfig, Transport, TransportError,
    error::{
        CONNECT, FLUSH, HANDSHAKE, READ, SHUTDOWN, UNIX_CONNECT, WRITE, map_io_error,
        map_rustls_error, map_tls_io_error,
    },
    util::{configure_tcp, connect_tcp, is_disconnect, set_tcp_timeouts},
};

/// 已建立连接的具体介质。
pub(crate) enum Stream {
    Tcp(TcpStream),
    TlsClient(Box<StreamOwned<ClientConnection, TcpStream>>),
    TlsServer(Box<StreamOwned<ServerConnection, TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    fn is_tls(&self) -> bool {
        matches!(self, Stream::TlsClient(_) | Stream::TlsServer(_))
    }

    /// 发送 TLS `close_notify`（若适用）并关闭双向。
    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Stream::TlsClient(stream) => {
                stream.conn.send_close_notify();
                while stream.conn.wants_write() {
                    stream.conn.write_tls(&mut stream.sock)?;
                }
                stream.sock.shutdown(Shutdown::Both)
            }
            Stream::TlsServer(stream) => {
                stream.conn.send_close_notify();
                while stream.conn.wants_write() {
                    stream.conn.write_tls(&mut stream.sock)?;
                }
                stream.sock.shutdown(Shutdown::Both)
            }
            #[cfg(unix)]
            Stream::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.read(buf),
            Stream::TlsClient(stream) => stream.read(buf),
            Stream::TlsServer(stream) => stream.read(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.write(buf),
            Stream::TlsClient(stream) => stream.write(buf),
            Stream::TlsServer(stream) => stream.write(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.flush(),
            Stream::TlsClient(stream) => stream.flush(),
            Stream::TlsServer(stream) => stream.flush(),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.flush(),
        }
    }
}

/// 客户端字节流端点：明文 TCP、TLS over TCP 或 Unix Domain Socket。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“连到哪里、用什么介质、超时多少”在构造时固定下来，真正的建连推迟到 [`Transport::open`]，
///   上层可以先完成缓冲层与编码层的组装再统一打开。
///
/// ## 逻辑（How）
/// - TCP：解析全部候选地址，逐个以 `socket2` 建连，每次尝试受 `connect` 超时约束；
///   成功后设置 `TCP_NODELAY` 与 `socket` 读写超时；
/// - TLS：TCP 建连后在 `open` 内完成整个握手，握手期间的读写超时取 `connect`，
///   握手失败因此直接从 `open` 返回；
/// - Unix：`UnixStream::connect`，没有建连超时的概念，只应用 I/O 超时。
///
/// ## 契约（What）
/// - `open` 成功前不会返回半打开的状态：任一步骤失败都会丢弃已建立的底层连接；
/// - `close` 幂等，TLS 连接会先发送 `close_notify`；
/// - 由监听端 `accept` 得到的实例关闭后不能重新打开。
pub struct Socket {
    endpoint: Endpoint,
    timeouts: TimeoutConfig,
    tls: Option<Arc<ClientConfig>>,
    stream: Option<Stream>,
    reconnectable: bool,
}

impl Socket {
    /// 构造尚未打开的客户端端点；`tls` 对 Unix 端点无效。
    pub fn new(endpoint: Endpoint, timeouts: TimeoutConfig, tls: Option<Arc<ClientConfig>>) -> Self {
        Self {
            endpoint,
            timeouts,
            tls,
            stream: None,
            reconnectable: true,
        }
    }

    pub(crate) fn accepted(endpoint: Endpoint, timeout: Option<Duration>, stream: Stream) -> Self {
        Self {
            endpoint,
            timeouts: TimeoutConfig::new(None, timeout),
            tls: None,
            stream: Some(stream),
            reconnectable: false,
        }
    }

    /// 目标端点（对 `accept` 得到的实例为对端地址）。
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 生效的超时配置。
    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    /// 打开后是否走 TLS。
    pub fn is_tls(&self) -> bool {
        match &self.stream {
            Some(stream) => stream.is_tls(),
            None => self.tls.is_some() && !self.endpoint.is_unix(),
        }
    }

    fn connect(&self) -> Result<Stream> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let tcp = connect_tcp(host, *port, self.timeouts.connect)?;
                match &self.tls {
                    Some(config) => {
                        let tls = handshake(Arc::clone(config), host, tcp, self.timeouts)?;
                        Ok(Stream::TlsClient(Box::new(tls)))
                    }
                    None => {
                        configure_tcp(&tcp, self.timeouts.socket)?;
                        Ok(Stream::Tcp(tcp))
                    }
                }
            }
            Endpoint::Unix { path } => connect_unix(path, self.timeouts.socket),
        }
    }

    fn stream_mut(&mut self, kind: OperationKind) -> Result<&mut Stream> {
        self.stream
            .as_mut()
            .ok_or(TransportError::NotOpen { kind })
    }
}

impl Transport for Socket {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if !self.reconnectable {
            return Err(TransportError::NotOpen { kind: CONNECT });
        }
        let stream = self.connect()?;
        debug!(
            endpoint = %self.endpoint,
            tls = stream.is_tls(),
            "transport opened"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if let Err(err) = stream.shutdown()
            && !is_disconnect(&err)
        {
            let err = map_io_error(SHUTDOWN, err);
            debug!(endpoint = %self.endpoint, code = err.code(), error = %err, "shutdown failed");
        }
        debug!(endpoint = %self.endpoint, "transport closed");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let bound = self.timeouts.socket;
        self.stream_mut(READ)?
            .read(buf)
            .map_err(|err| map_stream_error(READ, err, "socket", bound))
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let bound = self.timeouts.socket;
        self.stream_mut(WRITE)?
            .write_all(buf)
            .map_err(|err| map_stream_error(WRITE, err, "socket", bound))
    }

    fn flush(&mut self) -> Result<()> {
        let bound = self.timeouts.socket;
        self.stream_mut(FLUSH)?
            .flush()
            .map_err(|err| map_stream_error(FLUSH, err, "socket", bound))
    }
}

/// 阻塞套接字上的 `WouldBlock` / `TimedOut` 只可能来自读写超时，改写为指明超时的 `TimedOut`。
fn map_stream_error(
    kind: OperationKind,
    err: io::Error,
    timeout_name: &str,
    bound: Option<Duration>,
) -> TransportError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            let detail = match bound {
                Some(bound) => format!("no progress within {timeout_name} timeout of {bound:?}"),
                None => format!("{timeout_name} timed out"),
            };
            map_io_error(kind, io::Error::new(io::ErrorKind::TimedOut, detail))
        }
        _ => map_tls_io_error(kind, err),
    }
}

/// 在 `open` 内完成客户端握手，握手结束后切换为 I/O 超时。
fn handshake(
    config: Arc<ClientConfig>,
    host: &str,
    mut tcp: TcpStream,
    timeouts: TimeoutConfig,
) -> Result<StreamOwned<ClientConnection, TcpStream>> {
    let name = ServerName::try_from(host.to_owned()).map_err(|err| {
        map_io_error(HANDSHAKE, io::Error::new(io::ErrorKind::InvalidInput, err))
    })?;
    let mut conn =
        ClientConnection::new(config, name).map_err(|err| map_rustls_error(HANDSHAKE, err))?;

    configure_tcp(&tcp, timeouts.connect)?;
    while conn.is_handshaking() {
        conn.complete_io(&mut tcp)
            .map_err(|err| map_stream_error(HANDSHAKE, err, "connect", timeouts.connect))?;
    }
    set_tcp_timeouts(&tcp, timeouts.socket)?;
    Ok(StreamOwned::new(conn, tcp))
}

#[cfg(unix)]
fn connect_unix(path: &std::path::Path, timeout: Option<Duration>) -> Result<Stream> {
    let stream = UnixStream::connect(path).map_err(|err| map_io_error(UNIX_CONNECT, err))?;
    crate::util::set_unix_timeouts(&stream, timeout)?;
    Ok(Stream::Unix(stream))
}

#[cfg(not(unix))]
fn connect_unix(_path: &std::path::Path, _timeout: Option<Duration>) -> Result<Stream> {
    Err(map_io_error(
        UNIX_CONNECT,
        io::Error::new(
            io::ErrorKind::Unsupported,
            "unix domain sockets are not available on this platform",
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::TcpListener as StdTcpListener, thread, time::Instant};

    #[test]
    fn plain_tcp_round_trip() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let echo = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let mut socket = Socket::new(
            Endpoint::tcp("127.0.0.1", port),
            TimeoutConfig::default(),
            None,
        );
        assert!(!socket.is_open());
        socket.open().unwrap();
        socket.write(b"ping").unwrap();
        socket.flush().unwrap();
        let mut buf = [0u8; 4];
        socket.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        socket.close().unwrap();
        socket.close().unwrap();
        assert!(!socket.is_open());
        echo.join().unwrap();
    }

    #[test]
    fn refused_connect_surfaces_the_io_fault() {
        let port = {
            let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut socket = Socket::new(
            Endpoint::tcp("127.0.0.1", port),
            TimeoutConfig::uniform(Duration::from_millis(500)),
            None,
        );
        let started = Instant::now();
        let err = socket.open().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(err.code(), CONNECT.code);
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionRefused));
        assert!(!socket.is_open());
    }

    #[test]
    fn io_before_open_is_rejected() {
        let mut socket = Socket::new(Endpoint::tcp("127.0.0.1", 1), TimeoutConfig::default(), None);
        let err = socket.write(b"x").unwrap_err();
        assert!(matches!(err, TransportError::NotOpen { .. }));
    }

    #[test]
    fn silent_peer_read_names_the_socket_timeout() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release, hold) = std::sync::mpsc::channel::<()>();
        let peer = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            let _ = hold.recv();
        });

        let mut socket = Socket::new(
            Endpoint::tcp("127.0.0.1", port),
            TimeoutConfig::new(None, Some(Duration::from_millis(200))),
            None,
        );
        socket.open().unwrap();
        let started = Instant::now();
        let mut buf = [0u8; 1];
        let err = socket.read(&mut buf).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(err.is_timeout(), "{err:?}");
        assert_eq!(err.code(), READ.code);
        assert_eq!(err.io_kind(), Some(io::ErrorKind::TimedOut));
        let message = format!("{err}");
        assert!(message.contains("socket timeout of 200ms"), "{message}");

        release.send(()).unwrap();
        peer.join().unwrap();
    }

    #[test]
    fn non_timeout_faults_keep_their_kind() {
        let err = map_stream_error(
            READ,
            io::Error::from(io::ErrorKind::ConnectionReset),
            "socket",
            Some(Duration::from_millis(200)),
        );
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionReset));
        assert!(!err.is_timeout());
    }

    #[cfg(unix)]
    #[test]
    fn unix_socket_ignores_tls_and_connects() {
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpc.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let acceptor = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"ok").unwrap();
        });

        let config = Arc::new(
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .unwrap()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth(),
        );
        let mut socket = Socket::new(Endpoint::unix(&path), TimeoutConfig::default(), Some(config));
        assert!(!socket.is_tls());
        socket.open().unwrap();
        let mut buf = [0u8; 2];
        socket.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
        socket.close().unwrap();
        acceptor.join().unwrap();
    }
}
