use core::fmt;

use crate::ProtocolError;

/// 严格模式消息头的版本标记。
pub const VERSION_1: u32 = 0x8001_0000;
/// 从消息头首个 `i32` 中取出版本位的掩码。
pub const VERSION_MASK: u32 = 0xffff_0000;

/// 消息类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// 需要应答的调用。
    Call = 1,
    /// 正常应答。
    Reply = 2,
    /// 异常应答。
    Exception = 3,
    /// 单向调用，不产生应答。
    Oneway = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// 字段与容器元素的线上类型标记。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TType {
    /// 结构体字段结束标记。
    Stop = 0,
    /// 空值。
    Void = 1,
    /// 布尔。
    Bool = 2,
    /// 有符号字节。
    Byte = 3,
    /// 双精度浮点。
    Double = 4,
    /// 16 位整数。
    I16 = 6,
    /// 32 位整数。
    I32 = 8,
    /// 64 位整数。
    I64 = 10,
    /// 字符串或二进制。
    String = 11,
    /// 结构体。
    Struct = 12,
    /// 映射。
    Map = 13,
    /// 集合。
    Set = 14,
    /// 列表。
    List = 15,
}

impl TryFrom<u8> for TType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => TType::Stop,
            1 => TType::Void,
            2 => TType::Bool,
            3 => TType::Byte,
            4 => TType::Double,
            6 => TType::I16,
            8 => TType::I32,
            10 => TType::I64,
            11 => TType::String,
            12 => TType::Struct,
            13 => TType::Map,
            14 => TType::Set,
            15 => TType::List,
            other => return Err(ProtocolError::InvalidData(format!("unknown type tag {other}"))),
        })
    }
}

/// 消息头。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// 方法名。
    pub name: String,
    /// 消息类型。
    pub kind: MessageType,
    /// 调用序号，应答沿用请求的序号。
    pub seqid: i32,
}

impl MessageHeader {
    /// 构造消息头。
    pub fn new(name: impl Into<String>, kind: MessageType, seqid: i32) -> Self {
        Self {
            name: name.into(),
            kind,
            seqid,
        }
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} ({:?})", self.name, self.seqid, self.kind)
    }
}

/// 字段头；`ttype == TType::Stop` 时 `id` 无意义。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldHeader {
    /// 字段类型。
    pub ttype: TType,
    /// 字段编号。
    pub id: i16,
}

impl FieldHeader {
    /// 是否为结构体结束标记。
    pub fn is_stop(&self) -> bool {
        self.ttype == TType::Stop
    }
}

/// 列表或集合头。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListHeader {
    /// 元素类型。
    pub element: TType,
    /// 元素个数。
    pub size: usize,
}

/// 映射头。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapHeader {
    /// 键类型。
    pub key: TType,
    /// 值类型。
    pub value: TType,
    /// 条目数。
    pub size: usize,
}
