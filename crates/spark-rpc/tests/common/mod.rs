#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

use rcgen::generate_simple_self_signed;
use spark_rpc::{
    ApplicationError, Client, Handler, ProcessError, ServerDescriptor, ServerRuntime, StopHandle,
    ThreadedServer,
    protocol::{MessageHeader, MessageType, Protocol, ProtocolError, TType},
    transport::{Endpoint, TransportError},
};
use tempfile::TempDir;

/// 测试用服务契约：只携带一个名字，框架从不检查它。
#[derive(Debug)]
pub struct EchoService {
    pub name: &'static str,
}

pub fn echo_service() -> Arc<EchoService> {
    Arc::new(EchoService { name: "echo" })
}

/// `echo(text) -> text`；`fail(text)` 读完参数后返回业务错误。
pub struct EchoHandler;

impl Handler<EchoService> for EchoHandler {
    fn handle(
        &self,
        _service: &EchoService,
        call: &MessageHeader,
        protocol: &mut dyn Protocol,
    ) -> Result<(), ProcessError> {
        match call.name.as_str() {
            "echo" => {
                let text = read_text_args(protocol)?;
                protocol.write_message_begin(&MessageHeader::new(
                    "echo",
                    MessageType::Reply,
                    call.seqid,
                ))?;
                protocol.write_struct_begin("echo_result")?;
                protocol.write_field_begin("success", TType::String, 0)?;
                protocol.write_string(&text)?;
                protocol.write_field_end()?;
                protocol.write_field_stop()?;
                protocol.write_struct_end()?;
                protocol.write_message_end()?;
                protocol.flush()?;
                Ok(())
            }
            "fail" => {
                let text = read_text_args(protocol)?;
                Err(ProcessError::Handler(format!("refusing `{text}`")))
            }
            other => Err(ProcessError::UnknownMethod(other.to_owned())),
        }
    }
}

fn read_text_args(protocol: &mut dyn Protocol) -> Result<String, ProtocolError> {
    let mut text = String::new();
    protocol.read_struct_begin()?;
    loop {
        let field = protocol.read_field_begin()?;
        if field.is_stop() {
            break;
        }
        match (field.id, field.ttype) {
            (1, TType::String) => text = protocol.read_string()?,
            (_, other) => protocol.skip(other)?,
        }
        protocol.read_field_end()?;
    }
    protocol.read_struct_end()?;
    protocol.read_message_end()?;
    Ok(text)
}

/// 一次调用的结果。
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Exception(ApplicationError),
}

/// 客户端侧：发送 `method(text)` 并读取应答。
pub fn call<S>(client: &mut Client<S>, method: &str, seqid: i32, text: &str) -> Outcome {
    let protocol = client.protocol();
    protocol
        .write_message_begin(&MessageHeader::new(method, MessageType::Call, seqid))
        .unwrap();
    protocol.write_struct_begin("args").unwrap();
    protocol.write_field_begin("text", TType::String, 1).unwrap();
    protocol.write_string(text).unwrap();
    protocol.write_field_end().unwrap();
    protocol.write_field_stop().unwrap();
    protocol.write_struct_end().unwrap();
    protocol.write_message_end().unwrap();
    protocol.flush().unwrap();

    let header = protocol.read_message_begin().unwrap();
    assert_eq!(header.seqid, seqid);
    match header.kind {
        MessageType::Reply => {
            let mut reply = String::new();
            protocol.read_struct_begin().unwrap();
            loop {
                let field = protocol.read_field_begin().unwrap();
                if field.is_stop() {
                    break;
                }
                match field.id {
                    0 => reply = protocol.read_string().unwrap(),
                    _ => protocol.skip(field.ttype).unwrap(),
                }
                protocol.read_field_end().unwrap();
            }
            protocol.read_struct_end().unwrap();
            protocol.read_message_end().unwrap();
            Outcome::Reply(reply)
        }
        MessageType::Exception => {
            let error = ApplicationError::read(protocol).unwrap();
            protocol.read_message_end().unwrap();
            Outcome::Exception(error)
        }
        other => panic!("unexpected reply type {other:?}"),
    }
}

/// 在后台线程中运行的服务端。
pub struct RunningServer {
    pub endpoint: Endpoint,
    pub tls: bool,
    stop: StopHandle,
    thread: Option<JoinHandle<Result<(), TransportError>>>,
}

impl RunningServer {
    pub fn start(descriptor: ServerDescriptor) -> Self {
        let endpoint = descriptor.local_endpoint().clone();
        let tls = descriptor.is_tls();
        let mut server = ThreadedServer::new(descriptor);
        let stop = server.stop_handle();
        let thread = thread::Builder::new()
            .name("spark-rpc-test-server".into())
            .spawn(move || server.serve())
            .unwrap();
        Self {
            endpoint,
            tls,
            stop,
            thread: Some(thread),
        }
    }

    pub fn port(&self) -> u16 {
        match &self.endpoint {
            Endpoint::Tcp { port, .. } => *port,
            other => panic!("not a tcp server: {other}"),
        }
    }

    /// 停止并等待 accept-loop 返回。
    pub fn shutdown(mut self) -> Result<(), TransportError> {
        self.stop.stop();
        self.thread.take().map_or(Ok(()), |thread| thread.join().unwrap())
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// 自签名证书材料，SAN 覆盖 `localhost` 与 `127.0.0.1`。
pub struct TlsMaterial {
    _dir: TempDir,
    /// 证书 + 私钥。
    pub combined: PathBuf,
    /// 仅证书，供客户端作为 CA 使用。
    pub cafile: PathBuf,
}

pub fn tls_material() -> TlsMaterial {
    let dir = tempfile::tempdir().unwrap();
    let certified =
        generate_simple_self_signed(vec!["localhost".to_owned(), "127.0.0.1".to_owned()]).unwrap();
    let cert_pem = certified.cert.pem();
    let combined = dir.path().join("server.pem");
    std::fs::write(
        &combined,
        format!("{cert_pem}{}", certified.key_pair.serialize_pem()),
    )
    .unwrap();
    let cafile = dir.path().join("ca.pem");
    std::fs::write(&cafile, cert_pem).unwrap();
    TlsMaterial {
        _dir: dir,
        combined,
        cafile,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
