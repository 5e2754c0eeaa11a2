use spark_rpc_transport::Transport;

use crate::{FieldHeader, ListHeader, MapHeader, MessageHeader, ProtocolError, Result, TType};

/// `skip` 允许的最大嵌套深度。
const MAX_SKIP_DEPTH: usize = 64;

/// 协议句柄：在传输之上读写 RPC 消息。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 客户端与服务端处理器只面向该 trait 编程，编码实现可以替换；
/// - 句柄拥有其下方的传输，关闭连接通过 [`Protocol::transport`] 完成。
///
/// ## 契约（What）
/// - 读写方法按线上顺序调用，`*_end` 对无分隔符的编码可以是空操作；
/// - `read_field_begin` 返回 `TType::Stop` 时表示结构体结束；
/// - [`Protocol::skip`] 丢弃一个给定类型的完整值，嵌套超过 64 层时返回 `InvalidData`。
pub trait Protocol: Send {
    /// 写消息头。
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()>;
    /// 结束一条消息。
    fn write_message_end(&mut self) -> Result<()>;
    /// 开始结构体。
    fn write_struct_begin(&mut self, name: &str) -> Result<()>;
    /// 结束结构体。
    fn write_struct_end(&mut self) -> Result<()>;
    /// 写字段头。
    fn write_field_begin(&mut self, name: &str, ttype: TType, id: i16) -> Result<()>;
    /// 结束字段。
    fn write_field_end(&mut self) -> Result<()>;
    /// 写结构体结束标记。
    fn write_field_stop(&mut self) -> Result<()>;
    /// 写列表头。
    fn write_list_begin(&mut self, header: ListHeader) -> Result<()>;
    /// 结束列表。
    fn write_list_end(&mut self) -> Result<()>;
    /// 写集合头。
    fn write_set_begin(&mut self, header: ListHeader) -> Result<()>;
    /// 结束集合。
    fn write_set_end(&mut self) -> Result<()>;
    /// 写映射头。
    fn write_map_begin(&mut self, header: MapHeader) -> Result<()>;
    /// 结束映射。
    fn write_map_end(&mut self) -> Result<()>;
    /// 写布尔。
    fn write_bool(&mut self, value: bool) -> Result<()>;
    /// 写字节。
    fn write_byte(&mut self, value: i8) -> Result<()>;
    /// 写 `i16`。
    fn write_i16(&mut self, value: i16) -> Result<()>;
    /// 写 `i32`。
    fn write_i32(&mut self, value: i32) -> Result<()>;
    /// 写 `i64`。
    fn write_i64(&mut self, value: i64) -> Result<()>;
    /// 写 `f64`。
    fn write_double(&mut self, value: f64) -> Result<()>;
    /// 写 UTF-8 字符串。
    fn write_string(&mut self, value: &str) -> Result<()>;
    /// 写二进制。
    fn write_binary(&mut self, value: &[u8]) -> Result<()>;

    /// 读消息头。
    fn read_message_begin(&mut self) -> Result<MessageHeader>;
    /// 结束读取一条消息。
    fn read_message_end(&mut self) -> Result<()>;
    /// 开始读取结构体。
    fn read_struct_begin(&mut self) -> Result<()>;
    /// 结束读取结构体。
    fn read_struct_end(&mut self) -> Result<()>;
    /// 读字段头。
    fn read_field_begin(&mut self) -> Result<FieldHeader>;
    /// 结束读取字段。
    fn read_field_end(&mut self) -> Result<()>;
    /// 读列表头。
    fn read_list_begin(&mut self) -> Result<ListHeader>;
    /// 结束读取列表。
    fn read_list_end(&mut self) -> Result<()>;
    /// 读集合头。
    fn read_set_begin(&mut self) -> Result<ListHeader>;
    /// 结束读取集合。
    fn read_set_end(&mut self) -> Result<()>;
    /// 读映射头。
    fn read_map_begin(&mut self) -> Result<MapHeader>;
    /// 结束读取映射。
    fn read_map_end(&mut self) -> Result<()>;
    /// 读布尔。
    fn read_bool(&mut self) -> Result<bool>;
    /// 读字节。
    fn read_byte(&mut self) -> Result<i8>;
    /// 读 `i16`。
    fn read_i16(&mut self) -> Result<i16>;
    /// 读 `i32`。
    fn read_i32(&mut self) -> Result<i32>;
    /// 读 `i64`。
    fn read_i64(&mut self) -> Result<i64>;
    /// 读 `f64`。
    fn read_double(&mut self) -> Result<f64>;
    /// 读 UTF-8 字符串。
    fn read_string(&mut self) -> Result<String>;
    /// 读二进制。
    fn read_binary(&mut self) -> Result<Vec<u8>>;

    /// 把缓冲的数据推送到对端。
    fn flush(&mut self) -> Result<()>;

    /// 句柄下方的传输。
    fn transport(&mut self) -> &mut dyn Transport;

    /// 只读访问下方的传输。
    fn transport_ref(&self) -> &dyn Transport;

    /// 丢弃一个 `ttype` 类型的完整值。
    fn skip(&mut self, ttype: TType) -> Result<()> {
        skip_value(self, ttype, MAX_SKIP_DEPTH)
    }
}

fn skip_value<P: Protocol + ?Sized>(protocol: &mut P, ttype: TType, depth: usize) -> Result<()> {
    if depth == 0 {
        return Err(ProtocolError::InvalidData("maximum skip depth exceeded".into()));
    }
    match ttype {
        TType::Bool => protocol.read_bool().map(drop),
        TType::Byte => protocol.read_byte().map(drop),
        TType::I16 => protocol.read_i16().map(drop),
        TType::I32 => protocol.read_i32().map(drop),
        TType::I64 => protocol.read_i64().map(drop),
        TType::Double => protocol.read_double().map(drop),
        TType::String => protocol.read_binary().map(drop),
        TType::Struct => {
            protocol.read_struct_begin()?;
            loop {
                let field = protocol.read_field_begin()?;
                if field.is_stop() {
                    break;
                }
                skip_value(protocol, field.ttype, depth - 1)?;
                protocol.read_field_end()?;
            }
            protocol.read_struct_end()
        }
        TType::List | TType::Set => {
            let header = if ttype == TType::List {
                protocol.read_list_begin()?
            } else {
                protocol.read_set_begin()?
            };
            for _ in 0..header.size {
                skip_value(protocol, header.element, depth - 1)?;
            }
            if ttype == TType::List {
                protocol.read_list_end()
            } else {
                protocol.read_set_end()
            }
        }
        TType::Map => {
            let header = protocol.read_map_begin()?;
            for _ in 0..header.size {
                skip_value(protocol, header.key, depth - 1)?;
                skip_value(protocol, header.value, depth - 1)?;
            }
            protocol.read_map_end()
        }
        TType::Stop | TType::Void => Err(ProtocolError::InvalidData(format!(
            "cannot skip a value of type {ttype:?}"
        ))),
    }
}

/// 把（已缓冲的）传输包装为协议句柄。
///
/// 工厂是无状态的配置值，可在任意多个客户端与连接之间共享。
pub trait ProtocolFactory: Send + Sync {
    /// 构造协议句柄；句柄取得传输的所有权。
    fn protocol(&self, transport: Box<dyn Transport>) -> Box<dyn Protocol>;
}
