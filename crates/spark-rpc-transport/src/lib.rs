#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-rpc-transport

## 设计动机（Why）
- **定位**：为 spark-rpc 的连接引导层提供阻塞式字节流端点，覆盖明文 TCP、
  TLS over TCP 与 Unix Domain Socket 三种介质，客户端与监听端对称。
- **架构角色**：位于协议层之下，仅暴露 [`Transport`] / [`TransportFactory`]
  两个窄接口；缓冲层、编码层与服务端运行时都只依赖这两个 trait。

## 核心契约（What）
- [`Socket`]：未打开的客户端端点，`open` 时按 [`TimeoutConfig`] 建连并完成 TLS 握手；
- [`ServerSocket`]：构造即绑定并监听，`accept` 返回已打开的 [`Transport`]；
- [`BufferedTransportFactory`]：默认缓冲层工厂；
- [`TransportError`]：所有失败均映射为带稳定错误码的结构化错误，并保留底层 `io::Error`
  或 `rustls::Error`。

## 实现策略（How）
- TCP 建连与监听基于 `socket2`，以便在转换为标准库类型前设置超时与 `SO_REUSEADDR`；
- TLS 基于 `rustls::StreamOwned`，加密配置显式携带 `ring` provider，不依赖进程级默认值；
- 证书/私钥以 PEM 读取，解析交给 `rustls-pki-types`。

## 风险与考量（Trade-offs）
- 全部 I/O 为阻塞式，超时是唯一的阻塞上界；
- Unix Domain Socket 仅在 `cfg(unix)` 平台可用，其余平台构造该端点会返回 `Unsupported`。
"#]

mod buffered;
mod endpoint;
mod error;
mod memory;
mod server;
mod socket;
mod timeout;
pub mod tls;
mod transport;
mod util;

pub use buffered::{BufferedTransport, BufferedTransportFactory, DEFAULT_BUFFER_CAPACITY};
pub use endpoint::Endpoint;
pub use error::{ErrorCategory, OperationKind, TransportError};
pub use memory::MemoryTransport;
pub use server::ServerSocket;
pub use socket::Socket;
pub use timeout::{DEFAULT_TIMEOUT, TimeoutConfig};
pub use transport::{Transport, TransportFactory};

/// 传输层统一返回别名。
pub type Result<T, E = TransportError> = core::result::Result<T, E>;
