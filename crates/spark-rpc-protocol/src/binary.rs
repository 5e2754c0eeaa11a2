use spark_rpc_transport::Transport;
use tracing::trace;

use crate::{
    FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, Protocol, ProtocolError,
    ProtocolFactory, Result, TType, VERSION_1, VERSION_MASK,
};

/// 字符串、二进制与容器长度的默认上限：64 MiB。
pub const DEFAULT_CONTAINER_LIMIT: usize = 64 * 1024 * 1024;

/// 大端、长度前缀的二进制编码。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// - 整数与浮点以网络字节序定长写出，布尔占一个字节；
/// - 严格写：消息头首个 `i32` 为 `VERSION_1 | type`，其后是方法名与序号；
/// - 非严格读：首个 `i32` 为非负数时按旧格式解释为方法名长度，随后读取一个字节的类型与序号；
/// - 长度先校验符号再校验上限，超限时在分配内存之前返回错误。
///
/// ## 契约（What）
/// - `strict_read == true` 时拒绝旧格式消息头（[`ProtocolError::BadVersion`]）；
/// - `*_end` 方法均为空操作，本编码没有结束分隔符（结构体的 `Stop` 字段除外）。
pub struct BinaryProtocol {
    transport: Box<dyn Transport>,
    strict_read: bool,
    strict_write: bool,
    container_limit: usize,
}

impl BinaryProtocol {
    /// 以默认参数（严格读写、64 MiB 上限）包装传输。
    pub fn new(transport: Box<dyn Transport>) -> Self {
        BinaryProtocolFactory::default().build(transport)
    }

    /// 取回下方的传输。
    pub fn into_inner(self) -> Box<dyn Transport> {
        self.transport
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.transport.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_size(&mut self) -> Result<usize> {
        let size = self.read_i32()?;
        let size = usize::try_from(size).map_err(|_| ProtocolError::NegativeSize(size))?;
        if size > self.container_limit {
            return Err(ProtocolError::SizeLimit {
                size,
                limit: self.container_limit,
            });
        }
        Ok(size)
    }

    fn write_size(&mut self, size: usize) -> Result<()> {
        if size > self.container_limit {
            return Err(ProtocolError::SizeLimit {
                size,
                limit: self.container_limit,
            });
        }
        let size = i32::try_from(size).map_err(|_| ProtocolError::SizeLimit {
            size,
            limit: i32::MAX as usize,
        })?;
        self.write_i32(size)
    }

    fn read_ttype(&mut self) -> Result<TType> {
        TType::try_from(self.read_byte()? as u8)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.transport.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_list_header(&mut self) -> Result<ListHeader> {
        let element = self.read_ttype()?;
        let size = self.read_size()?;
        Ok(ListHeader { element, size })
    }
}

impl Protocol for BinaryProtocol {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        trace!(message = %header, "write message begin");
        if self.strict_write {
            self.write_i32((VERSION_1 | header.kind as u32) as i32)?;
            self.write_string(&header.name)?;
        } else {
            self.write_string(&header.name)?;
            self.write_byte(header.kind as i8)?;
        }
        self.write_i32(header.seqid)
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, _name: &str, ttype: TType, id: i16) -> Result<()> {
        self.write_byte(ttype as i8)?;
        self.write_i16(id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.write_byte(TType::Stop as i8)
    }

    fn write_list_begin(&mut self, header: ListHeader) -> Result<()> {
        self.write_byte(header.element as i8)?;
        self.write_size(header.size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, header: ListHeader) -> Result<()> {
        self.write_list_begin(header)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_map_begin(&mut self, header: MapHeader) -> Result<()> {
        self.write_byte(header.key as i8)?;
        self.write_byte(header.value as i8)?;
        self.write_size(header.size)
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_byte(i8::from(value))
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        Ok(self.transport.write(&value.to_be_bytes())?)
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        Ok(self.transport.write(&value.to_be_bytes())?)
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        Ok(self.transport.write(&value.to_be_bytes())?)
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        Ok(self.transport.write(&value.to_be_bytes())?)
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        Ok(self.transport.write(&value.to_bits().to_be_bytes())?)
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_binary(value.as_bytes())
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        self.write_size(value.len())?;
        Ok(self.transport.write(value)?)
    }

    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let first = self.read_i32()?;
        let header = if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(ProtocolError::BadVersion(word));
            }
            let kind = MessageType::try_from((word & 0xff) as u8)?;
            let name = self.read_string()?;
            let seqid = self.read_i32()?;
            MessageHeader { name, kind, seqid }
        } else {
            if self.strict_read {
                return Err(ProtocolError::BadVersion(first as u32));
            }
            let len = first as usize;
            if len > self.container_limit {
                return Err(ProtocolError::SizeLimit {
                    size: len,
                    limit: self.container_limit,
                });
            }
            let name = String::from_utf8(self.read_bytes(len)?)
                .map_err(|err| ProtocolError::InvalidData(err.to_string()))?;
            let kind = MessageType::try_from(self.read_byte()? as u8)?;
            let seqid = self.read_i32()?;
            MessageHeader { name, kind, seqid }
        };
        trace!(message = %header, "read message begin");
        Ok(header)
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let ttype = self.read_ttype()?;
        if ttype == TType::Stop {
            return Ok(FieldHeader { ttype, id: 0 });
        }
        let id = self.read_i16()?;
        Ok(FieldHeader { ttype, id })
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        self.read_list_header()
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<ListHeader> {
        self.read_list_header()
    }

    fn read_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapHeader> {
        let key = self.read_ttype()?;
        let value = self.read_ttype()?;
        let size = self.read_size()?;
        Ok(MapHeader { key, value, size })
    }

    fn read_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte()? != 0)
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.read_array()?)))
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_binary()?;
        String::from_utf8(bytes).map_err(|err| ProtocolError::InvalidData(err.to_string()))
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_size()?;
        self.read_bytes(len)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.transport.flush()?)
    }

    fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    fn transport_ref(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

/// [`BinaryProtocol`] 的工厂。
///
/// 默认严格读写、容器上限 [`DEFAULT_CONTAINER_LIMIT`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryProtocolFactory {
    /// 拒绝没有版本标记的旧格式消息头。
    pub strict_read: bool,
    /// 写出带版本标记的消息头。
    pub strict_write: bool,
    /// 字符串、二进制与容器的长度上限。
    pub container_limit: usize,
}

impl BinaryProtocolFactory {
    /// 构造具体类型的协议句柄。
    pub fn build(&self, transport: Box<dyn Transport>) -> BinaryProtocol {
        BinaryProtocol {
            transport,
            strict_read: self.strict_read,
            strict_write: self.strict_write,
            container_limit: self.container_limit,
        }
    }
}

impl Default for BinaryProtocolFactory {
    fn default() -> Self {
        Self {
            strict_read: true,
            strict_write: true,
            container_limit: DEFAULT_CONTAINER_LIMIT,
        }
    }
}

impl ProtocolFactory for BinaryProtocolFactory {
    fn protocol(&self, transport: Box<dyn Transport>) -> Box<dyn Protocol> {
        Box::new(self.build(transport))
    }
}
