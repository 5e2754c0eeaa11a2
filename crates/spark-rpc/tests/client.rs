mod common;

use std::{
    net::{SocketAddr, TcpListener},
    sync::{Arc, mpsc},
    thread,
    time::{Duration, Instant},
};

use common::{EchoHandler, Outcome, RunningServer, call, echo_service, init_tracing, tls_material};
use spark_rpc::{
    BootstrapError, ClientOptions, CollectingReporter, Diagnostic, ServerOptions, make_client,
    make_server,
    protocol::{MessageHeader, MessageType, ProtocolError},
    transport::{Endpoint, ErrorCategory, TransportError},
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn make_client_returns_an_open_client_against_a_live_listener() {
    init_tracing();
    let server = RunningServer::start(
        make_server(echo_service(), EchoHandler, &ServerOptions::tcp("127.0.0.1", 0)).unwrap(),
    );

    let started = Instant::now();
    let mut client = make_client(echo_service(), &ClientOptions::tcp("127.0.0.1", server.port()))
        .expect("client should connect");
    assert!(started.elapsed() < Duration::from_millis(3000));
    assert!(client.is_open());
    assert!(!client.is_tls());
    assert_eq!(client.service().name, "echo");
    assert_eq!(client.endpoint(), &Endpoint::tcp("127.0.0.1", server.port()));

    assert_eq!(
        call(&mut client, "echo", 1, "ping"),
        Outcome::Reply("ping".to_owned())
    );
    assert_eq!(
        call(&mut client, "echo", 2, "pong"),
        Outcome::Reply("pong".to_owned())
    );

    client.close().unwrap();
    client.close().unwrap();
    assert!(!client.is_open());
    server.shutdown().unwrap();
}

#[test]
fn refused_connection_fails_within_the_connect_timeout() {
    let port = free_port();
    let options = ClientOptions::tcp("127.0.0.1", port)
        .with_connect_timeout(Some(Duration::from_millis(500)));

    let started = Instant::now();
    let err = make_client(echo_service(), &options).unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(3000));

    let transport = err.as_transport().expect("transport error");
    assert_eq!(transport.io_kind(), Some(std::io::ErrorKind::ConnectionRefused));
    assert_eq!(transport.category(), ErrorCategory::Retryable);
    assert_eq!(err.code(), "spark.rpc.transport.tcp.connect_failed");
}

/// backlog 为 0 且已被填满的监听端口：新的 SYN 不再得到应答。
struct Saturated {
    port: u16,
    _listener: Socket,
    _fillers: Vec<Socket>,
}

fn saturated_listener() -> Saturated {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
    listener
        .bind(&SockAddr::from(SocketAddr::from(([127, 0, 0, 1], 0))))
        .unwrap();
    listener.listen(0).unwrap();
    let addr = listener.local_addr().unwrap().as_socket().unwrap();

    let mut fillers = Vec::new();
    for _ in 0..32 {
        let filler = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        match filler.connect_timeout(&SockAddr::from(addr), Duration::from_millis(100)) {
            Ok(()) => fillers.push(filler),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => break,
            Err(err) => panic!("unexpected filler failure: {err}"),
        }
    }
    Saturated {
        port: addr.port(),
        _listener: listener,
        _fillers: fillers,
    }
}

#[test]
fn unresponsive_listener_fails_at_the_connect_timeout() {
    let target = saturated_listener();
    let options = ClientOptions::tcp("127.0.0.1", target.port)
        .with_connect_timeout(Some(Duration::from_millis(300)));

    let started = Instant::now();
    let err = make_client(echo_service(), &options).unwrap_err();
    let elapsed = started.elapsed();

    let transport = err.as_transport().expect("transport error");
    assert_eq!(transport.category(), ErrorCategory::Timeout, "got {transport:?}");
    assert_eq!(err.code(), "spark.rpc.transport.tcp.connect_failed");
    assert!(elapsed >= Duration::from_millis(250), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned after {elapsed:?}");
}

#[test]
fn silent_server_read_fails_at_the_socket_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (release, hold) = mpsc::channel::<()>();
    let peer = thread::spawn(move || {
        let (_stream, _) = listener.accept().unwrap();
        let _ = hold.recv();
    });

    let options = ClientOptions::tcp("127.0.0.1", port)
        .with_socket_timeout(Some(Duration::from_millis(300)));
    let mut client = make_client(echo_service(), &options).unwrap();
    let protocol = client.protocol();
    protocol
        .write_message_begin(&MessageHeader::new("echo", MessageType::Call, 1))
        .unwrap();
    protocol.write_struct_begin("args").unwrap();
    protocol.write_field_stop().unwrap();
    protocol.write_struct_end().unwrap();
    protocol.write_message_end().unwrap();
    protocol.flush().unwrap();

    let started = Instant::now();
    let err = protocol.read_message_begin().unwrap_err();
    let elapsed = started.elapsed();
    match &err {
        ProtocolError::Transport(transport) => {
            assert!(transport.is_timeout(), "got {transport:?}");
            assert!(transport.to_string().contains("socket timeout"), "{transport}");
        }
        other => panic!("expected a transport timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(250), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned after {elapsed:?}");

    let _ = client.close();
    release.send(()).unwrap();
    peer.join().unwrap();
}

#[test]
fn url_overrides_host_and_port() {
    let server = RunningServer::start(
        make_server(echo_service(), EchoHandler, &ServerOptions::tcp("127.0.0.1", 0)).unwrap(),
    );
    let options = ClientOptions::tcp("203.0.113.1", 1)
        .with_url(format!("thrift://127.0.0.1:{}/echo", server.port()));
    let mut client = make_client(echo_service(), &options).unwrap();
    assert_eq!(client.endpoint(), &Endpoint::tcp("127.0.0.1", server.port()));
    assert_eq!(
        call(&mut client, "echo", 9, "via url"),
        Outcome::Reply("via url".to_owned())
    );
    client.close().unwrap();
}

#[test]
fn deprecated_timeout_is_reported_and_applied() {
    let server = RunningServer::start(
        make_server(echo_service(), EchoHandler, &ServerOptions::tcp("127.0.0.1", 0)).unwrap(),
    );
    let reporter = CollectingReporter::new();
    let options = ClientOptions::tcp("127.0.0.1", server.port())
        .with_timeout(Duration::from_millis(5000))
        .with_reporter(Arc::new(reporter.clone()));
    let mut client = make_client(echo_service(), &options).unwrap();

    assert_eq!(reporter.diagnostics(), vec![Diagnostic::DeprecatedTimeout]);
    assert_eq!(client.timeouts().connect, Some(Duration::from_millis(5000)));
    assert_eq!(client.timeouts().socket, Some(Duration::from_millis(5000)));
    client.close().unwrap();
}

#[cfg(unix)]
#[test]
fn tls_material_on_a_unix_socket_warns_and_skips_the_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("echo.sock");
    let server = RunningServer::start(
        make_server(echo_service(), EchoHandler, &ServerOptions::unix(&path)).unwrap(),
    );

    let reporter = CollectingReporter::new();
    // 这些文件并不存在：若尝试加载 TLS 材料，构造会失败。
    let options = ClientOptions::unix(&path)
        .with_cafile(dir.path().join("missing-ca.pem"))
        .with_certfile(dir.path().join("missing-cert.pem"))
        .with_reporter(Arc::new(reporter.clone()));
    let mut client = make_client(echo_service(), &options).expect("unix client ignores TLS");

    assert!(!client.is_tls());
    assert_eq!(
        reporter.diagnostics(),
        vec![Diagnostic::TlsIgnoredForUnixSocket { path: path.clone() }]
    );
    assert_eq!(
        call(&mut client, "echo", 3, "local"),
        Outcome::Reply("local".to_owned())
    );
    client.close().unwrap();
    server.shutdown().unwrap();
    assert!(!path.exists());
}

#[test]
fn tls_client_talks_to_tls_server() {
    init_tracing();
    let material = tls_material();
    let server = RunningServer::start(
        make_server(
            echo_service(),
            EchoHandler,
            &ServerOptions::tcp("127.0.0.1", 0).with_certfile(&material.combined),
        )
        .unwrap(),
    );
    assert!(server.tls);

    let options = ClientOptions::tcp("localhost", server.port()).with_cafile(&material.cafile);
    let mut client = make_client(echo_service(), &options).expect("TLS client");
    assert!(client.is_tls());
    assert_eq!(
        call(&mut client, "echo", 4, "secret"),
        Outcome::Reply("secret".to_owned())
    );
    client.close().unwrap();
}

#[test]
fn untrusted_server_certificate_fails_make_client() {
    let material = tls_material();
    let stranger = tls_material();
    let server = RunningServer::start(
        make_server(
            echo_service(),
            EchoHandler,
            &ServerOptions::tcp("127.0.0.1", 0).with_certfile(&material.combined),
        )
        .unwrap(),
    );

    let options = ClientOptions::tcp("127.0.0.1", server.port()).with_cafile(&stranger.cafile);
    let err = make_client(echo_service(), &options).unwrap_err();
    match err {
        BootstrapError::Transport(TransportError::Tls { .. }) => {}
        other => panic!("expected a TLS verification failure, got {other:?}"),
    }
}

#[test]
fn missing_cafile_is_a_transport_error_naming_the_file() {
    let options = ClientOptions::tcp("127.0.0.1", free_port()).with_cafile("/nonexistent/ca.pem");
    let err = make_client(echo_service(), &options).unwrap_err();
    assert_eq!(err.code(), "spark.rpc.transport.tls.material_invalid");
    assert!(err.to_string().contains("/nonexistent/ca.pem"));
}
