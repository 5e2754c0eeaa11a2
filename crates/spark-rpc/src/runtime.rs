//! 每连接一线程的 accept-loop 运行时。
//!
//! # 设计动机（Why）
//! - 服务端工厂只产出 [`ServerDescriptor`]，这里给出它的默认消费者，让
//!   “接受连接 → 组装协议栈 → 循环调用处理器” 的链路可以端到端运行；
//! - 阻塞式 `accept` 无法被另一个线程打断，因此监听套接字切换为非阻塞，
//!   以固定间隔轮询停止标志。
//!
//! # 契约（What）
//! - [`ServerRuntime::serve`] 阻塞当前线程直到 [`ServerRuntime::stop`]（或任一 [`StopHandle`]）被调用，
//!   返回前关闭监听套接字；
//! - 每条连接在独立线程中服务，直到对端关闭、出现错误或运行时停止；
//! - 连接线程在返回时被分离，不等待其结束。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use spark_rpc_transport::{ErrorCategory, OperationKind, Socket, TransportError};
use tracing::{debug, info, warn};

use crate::{server::Processor, server::ServerDescriptor, stack::ProtocolStack};

/// 轮询 accept 与停止标志的间隔。
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

const SPAWN: OperationKind = OperationKind {
    code: "spark.rpc.runtime.spawn_failed",
    message: "spawn connection thread",
};

/// 服务端运行时。
pub trait ServerRuntime {
    /// 开始接受连接，直到停止。
    fn serve(&mut self) -> Result<(), TransportError>;

    /// 请求停止；可从任意线程调用，可重复调用。
    fn stop(&self);
}

/// 可跨线程传递的停止句柄。
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// 请求停止。
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// 是否已请求停止。
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// 每连接一线程的运行时。
pub struct ThreadedServer {
    descriptor: ServerDescriptor,
    stop: StopHandle,
    connections: Vec<JoinHandle<()>>,
    accepted: Arc<AtomicUsize>,
}

impl ThreadedServer {
    /// 接管服务端描述。
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            stop: StopHandle::default(),
            connections: Vec::new(),
            accepted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 停止句柄，可交给其他线程。
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// 累计接受的连接数。
    pub fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    fn spawn_connection(&mut self, socket: Socket) -> Result<(), TransportError> {
        let id = self.accepted.fetch_add(1, Ordering::SeqCst);
        let processor = Arc::clone(&self.descriptor.processor);
        let stack = self.descriptor.stack.clone();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name(format!("spark-rpc-conn-{id}"))
            .spawn(move || serve_connection(socket, processor.as_ref(), &stack, &stop))
            .map_err(|err| TransportError::Io {
                kind: SPAWN,
                source: err,
            })?;
        self.connections.push(handle);
        Ok(())
    }

    fn accept_loop(&mut self) -> Result<(), TransportError> {
        self.descriptor.socket.set_nonblocking(true)?;
        while !self.stop.is_stopped() {
            self.connections.retain(|handle| !handle.is_finished());
            match self.descriptor.socket.poll_accept() {
                Ok(Some(socket)) => {
                    debug!(peer = %socket.endpoint(), "dispatching connection");
                    self.spawn_connection(socket)?;
                }
                Ok(None) => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(err) if err.category() == ErrorCategory::Retryable => {
                    warn!(code = err.code(), error = %err, "accept failed, continuing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl ServerRuntime for ThreadedServer {
    fn serve(&mut self) -> Result<(), TransportError> {
        info!(endpoint = %self.descriptor.local_endpoint(), "server started");
        let result = self.accept_loop();
        self.descriptor.socket.close();
        match &result {
            Ok(()) => info!(
                endpoint = %self.descriptor.local_endpoint(),
                connections = self.accepted_connections(),
                "server stopped"
            ),
            Err(err) => warn!(code = err.code(), error = %err, "server stopped on error"),
        }
        result
    }

    fn stop(&self) {
        self.stop.stop();
    }
}

fn serve_connection(
    socket: Socket,
    processor: &dyn Processor,
    stack: &ProtocolStack,
    stop: &StopHandle,
) {
    let peer = socket.endpoint().clone();
    let mut protocol = stack.assemble(Box::new(socket));
    while !stop.is_stopped() {
        match processor.process(protocol.as_mut()) {
            Ok(()) => {}
            Err(err) if err.is_end_of_stream() => break,
            Err(err) => {
                warn!(peer = %peer, code = err.code(), error = %err, "connection aborted");
                break;
            }
        }
    }
    if let Err(err) = protocol.transport().close() {
        debug!(peer = %peer, error = %err, "connection close failed");
    }
    debug!(peer = %peer, "connection finished");
}
