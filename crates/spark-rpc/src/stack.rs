use std::{fmt, sync::Arc};

use spark_rpc_protocol::{BinaryProtocolFactory, Protocol, ProtocolFactory};
use spark_rpc_transport::{BufferedTransportFactory, Transport, TransportFactory};

/// 协议栈配置：缓冲层工厂 + 编码层工厂。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 默认工厂在调用点显式构造并随配置传递，不存在进程级共享实例；
/// - 两个工厂都是无状态值，克隆只复制 `Arc`。
///
/// ## 契约（What）
/// - [`ProtocolStack::assemble`] 先用传输工厂包装原始字节流，再交给协议工厂；
///   编码层永远不直接读写未缓冲的传输；
/// - 组装过程不做任何 I/O。
#[derive(Clone)]
pub struct ProtocolStack {
    transport_factory: Arc<dyn TransportFactory>,
    protocol_factory: Arc<dyn ProtocolFactory>,
}

impl ProtocolStack {
    /// 以给定工厂构造。
    pub fn new(
        transport_factory: Arc<dyn TransportFactory>,
        protocol_factory: Arc<dyn ProtocolFactory>,
    ) -> Self {
        Self {
            transport_factory,
            protocol_factory,
        }
    }

    /// 替换传输工厂。
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = factory;
        self
    }

    /// 替换协议工厂。
    pub fn with_protocol_factory(mut self, factory: Arc<dyn ProtocolFactory>) -> Self {
        self.protocol_factory = factory;
        self
    }

    pub fn transport_factory(&self) -> &Arc<dyn TransportFactory> {
        &self.transport_factory
    }

    pub fn protocol_factory(&self) -> &Arc<dyn ProtocolFactory> {
        &self.protocol_factory
    }

    /// 把原始字节流组装为协议句柄。
    pub fn assemble(&self, transport: Box<dyn Transport>) -> Box<dyn Protocol> {
        let buffered = self.transport_factory.wrap(transport);
        self.protocol_factory.protocol(buffered)
    }
}

impl Default for ProtocolStack {
    fn default() -> Self {
        Self::new(
            Arc::new(BufferedTransportFactory::default()),
            Arc::new(BinaryProtocolFactory::default()),
        )
    }
}

impl fmt::Debug for ProtocolStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolStack").finish_non_exhaustive()
    }
}
