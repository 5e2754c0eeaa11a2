use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use socket2::{Domain, Protocol, SockAddr, Socket as RawSocket, Type};
use tracing::debug;

use crate::{
    Result,
    error::{BIND, CONFIGURE, CONNECT, RESOLVE, map_io_error},
};

/// `listen(2)` 的 backlog。
pub(crate) const LISTEN_BACKLOG: i32 = 128;

/// 解析主机名为全部候选地址。
pub(crate) fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| map_io_error(RESOLVE, err))?
        .collect();
    if addrs.is_empty() {
        return Err(map_io_error(
            RESOLVE,
            io::Error::new(io::ErrorKind::NotFound, format!("no address for `{host}`")),
        ));
    }
    Ok(addrs)
}

/// 依次尝试每个候选地址，全部尝试共享同一个 `timeout` 截止时间。
///
/// 截止时间耗尽时返回 `TimedOut`；否则全部失败时返回最后一个地址的错误，保留底层故障原因。
pub(crate) fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    connect_any(&resolve(host, port)?, timeout)
}

fn connect_any(addrs: &[SocketAddr], timeout: Option<Duration>) -> Result<TcpStream> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let mut last_error = None;
    for &addr in addrs {
        let remaining = match deadline {
            Some(deadline) => match remaining_until(deadline) {
                Some(remaining) => Some(remaining),
                None => {
                    last_error = Some(connect_deadline_exceeded(addr));
                    break;
                }
            },
            None => None,
        };
        match connect_one(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "tcp connect attempt failed");
                last_error = Some(err);
            }
        }
    }
    let err = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
    Err(map_io_error(CONNECT, err))
}

/// 距截止时间的剩余时长；已到期时返回 `None`。
pub(crate) fn remaining_until(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

fn connect_deadline_exceeded(addr: SocketAddr) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("connect timeout elapsed before trying {addr}"),
    )
}

fn connect_one(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    let target = SockAddr::from(addr);
    match timeout {
        Some(timeout) => socket.connect_timeout(&target, timeout)?,
        None => socket.connect(&target)?,
    }
    Ok(socket.into())
}

/// 绑定并监听第一个可用的候选地址。
pub(crate) fn bind_tcp(host: &str, port: u16) -> Result<TcpListener> {
    let mut last_error = None;
    for addr in resolve(host, port)? {
        match bind_one(addr) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                debug!(%addr, error = %err, "tcp bind attempt failed");
                last_error = Some(err);
            }
        }
    }
    let err = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
    Err(map_io_error(BIND, err))
}

fn bind_one(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// 为已建立的 TCP 连接设置 `TCP_NODELAY` 与读写超时。
pub(crate) fn configure_tcp(stream: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    stream
        .set_nodelay(true)
        .map_err(|err| map_io_error(CONFIGURE, err))?;
    set_tcp_timeouts(stream, timeout)
}

pub(crate) fn set_tcp_timeouts(stream: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    stream
        .set_read_timeout(timeout)
        .and_then(|_| stream.set_write_timeout(timeout))
        .map_err(|err| map_io_error(CONFIGURE, err))
}

#[cfg(unix)]
pub(crate) fn set_unix_timeouts(
    stream: &std::os::unix::net::UnixStream,
    timeout: Option<Duration>,
) -> Result<()> {
    stream
        .set_read_timeout(timeout)
        .and_then(|_| stream.set_write_timeout(timeout))
        .map_err(|err| map_io_error(CONFIGURE, err))
}

/// 连接已经不存在时的关闭错误可以忽略。
pub(crate) fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 监听队列已被占满的端点：新的 SYN 不会得到应答，建连只能等到超时。
    struct Saturated {
        addr: SocketAddr,
        _listener: RawSocket,
        _fillers: Vec<RawSocket>,
    }

    fn saturated_listener() -> Saturated {
        let listener = RawSocket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        listener
            .bind(&SockAddr::from(SocketAddr::from(([127, 0, 0, 1], 0))))
            .unwrap();
        listener.listen(0).unwrap();
        let addr = listener.local_addr().unwrap().as_socket().unwrap();

        let mut fillers = Vec::new();
        for _ in 0..32 {
            let filler = RawSocket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
            match filler.connect_timeout(&SockAddr::from(addr), Duration::from_millis(100)) {
                Ok(()) => fillers.push(filler),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) => panic!("unexpected filler failure: {err}"),
            }
        }
        Saturated {
            addr,
            _listener: listener,
            _fillers: fillers,
        }
    }

    #[test]
    fn unresponsive_listener_times_out_within_the_bound() {
        let target = saturated_listener();
        let started = Instant::now();
        let err = connect_any(&[target.addr], Some(Duration::from_millis(300))).unwrap_err();
        let elapsed = started.elapsed();
        assert!(err.is_timeout(), "got {err:?}");
        assert_eq!(err.code(), CONNECT.code);
        assert!(elapsed >= Duration::from_millis(250), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "returned after {elapsed:?}");
    }

    #[test]
    fn one_deadline_covers_every_candidate_address() {
        let first = saturated_listener();
        let second = saturated_listener();
        let started = Instant::now();
        let err = connect_any(&[first.addr, second.addr], Some(Duration::from_millis(300)))
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(err.is_timeout(), "got {err:?}");
        assert!(elapsed < Duration::from_millis(550), "returned after {elapsed:?}");
    }

    #[test]
    fn exhausted_deadline_is_a_timeout() {
        assert_eq!(remaining_until(Instant::now()), None);
        assert!(remaining_until(Instant::now() + Duration::from_secs(5)).is_some());
    }
}
