#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `spark-rpc-protocol` 定义协议句柄契约，并提供默认的严格二进制编码。
//!
//! # 教案背景（Why）
//! - 连接引导层只负责“把字节流变成协议句柄”，具体编码通过 [`ProtocolFactory`] 注入，
//!   调用方可以替换为任何实现了 [`Protocol`] 的编码；
//! - 默认的 [`BinaryProtocol`] 让客户端与服务端工厂开箱即用，也让运行时的
//!   “读到对端关闭为止” 语义有一个可测试的落点。
//!
//! # 使用概览（How）
//! - 以 [`BinaryProtocolFactory::default`] 包装任意 `Box<dyn Transport>` 得到协议句柄；
//! - 写端依次调用 `write_message_begin → 结构体/字段 → write_message_end → flush`；
//! - 读端对称调用 `read_*`，不关心的字段交给 [`Protocol::skip`]。
//!
//! # 合约说明（What）
//! - 严格模式的消息头为 `0x8001_0000 | type`、方法名、序号；
//! - 字符串与二进制以 `i32` 长度前缀编码，负长度与超过上限的长度会被拒绝；
//! - 所有失败统一为 [`ProtocolError`]，传输层错误原样保留。
//!
//! # 风险提示与后续（Trade-offs）
//! - 编码层假设下方已有缓冲层，逐字段的小块读写直接落在传输上会放大系统调用次数。

mod binary;
mod error;
mod protocol;
mod types;

pub use crate::binary::{BinaryProtocol, BinaryProtocolFactory, DEFAULT_CONTAINER_LIMIT};
pub use crate::error::ProtocolError;
pub use crate::protocol::{Protocol, ProtocolFactory};
pub use crate::types::{
    FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, TType, VERSION_1, VERSION_MASK,
};

/// 协议层统一返回别名。
pub type Result<T, E = ProtocolError> = core::result::Result<T, E>;
