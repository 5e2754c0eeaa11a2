#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-rpc

## 设计动机（Why）
- **定位**：RPC 连接引导层，把少量连接参数（host/port、Unix 路径或 URL，可选 TLS 材料与超时）
  转换为已打开的客户端，或已绑定监听、尚未启动的服务端。
- **架构角色**：端点解析 → 传输构建 → 协议栈组装 → 客户端/服务端工厂，逐级单向传递，
  任一阶段失败立即返回调用方，不做重试。

## 核心契约（What）
- [`make_client`]：同步建连，返回的 [`Client`] 一定处于打开状态；
- [`connect_scoped`] / [`with_client`]：作用域结束时关闭传输，覆盖正常返回、错误返回与 panic；
- [`make_server`]：绑定并监听，返回 [`ServerDescriptor`]，交由 [`ThreadedServer`] 等运行时服务；
- 非致命事件（弃用的统一 `timeout`、Unix 端点上的 TLS 材料）经 [`DiagnosticReporter`] 上报。

## 实现策略（How）
- 优先级规则为纯函数（[`endpoint::resolve`]、[`resolve_timeouts`]），可脱离 I/O 测试；
- 默认协议栈（缓冲层 + 严格二进制编码）在每次调用时显式构造，没有进程级共享实例；
- 配置结构实现 `serde::Deserialize`，可从 TOML 文档加载。

## 风险与考量（Trade-offs）
- 全部 I/O 为阻塞式，超时是唯一的阻塞上界；
- Unix 端点上的 TLS 材料只产生诊断而不报错，以兼容既有调用方式。
"#]

mod client;
mod config;
pub mod diagnostics;
pub mod endpoint;
mod error;
pub mod runtime;
mod server;
mod stack;
mod timeout;

pub use client::{
    Client, ClientGuard, ClientOptions, DEFAULT_HOST, DEFAULT_PORT, connect_scoped, make_client,
    with_client,
};
pub use diagnostics::{CollectingReporter, Diagnostic, DiagnosticReporter, TracingReporter};
pub use error::{BootstrapError, ConfigurationError, ProcessError};
pub use runtime::{ServerRuntime, StopHandle, ThreadedServer};
pub use server::{
    ApplicationError, ApplicationErrorKind, Handler, Processor, ServerDescriptor, ServerOptions,
    ServiceProcessor, make_server, make_server_with,
};
pub use stack::ProtocolStack;
pub use timeout::resolve_timeouts;

pub use spark_rpc_protocol as protocol;
pub use spark_rpc_transport as transport;
