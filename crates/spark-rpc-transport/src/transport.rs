use crate::{
    Result,
    error::{READ, TransportError},
};

/// 阻塞式字节流传输的最小契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 协议层、缓冲层与服务端运行时只通过该 trait 与具体介质交互，明文 TCP、TLS、Unix Domain
///   Socket 以及测试用的内存传输可以互相替换。
///
/// ## 契约（What）
/// - `open`：建立连接；已打开时为空操作；
/// - `close`：幂等，多次调用安全，关闭后 `is_open` 返回 `false`；
/// - `read`：单次读取，返回 `0` 表示对端关闭；
/// - `write`：写入整个缓冲区；
/// - `flush`：把已缓冲的数据推送到对端；
/// - 读写受 [`TimeoutConfig::socket`](crate::TimeoutConfig) 约束，超时返回 `Timeout` 类错误。
pub trait Transport: Send {
    /// 当前是否处于打开状态。
    fn is_open(&self) -> bool;

    /// 打开传输。
    fn open(&mut self) -> Result<()>;

    /// 关闭传输，可重复调用。
    fn close(&mut self) -> Result<()>;

    /// 读取最多 `buf.len()` 字节。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// 写入全部字节。
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// 刷新写缓冲。
    fn flush(&mut self) -> Result<()>;

    /// 读满 `buf`，对端提前关闭时返回 [`TransportError::EndOfStream`]。
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 => return Err(TransportError::EndOfStream { kind: READ }),
                n => filled += n,
            }
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }
}

/// 把原始字节流包装为另一层传输（例如缓冲层）。
///
/// 工厂本身应当无状态，可在多个客户端/连接之间共享。
pub trait TransportFactory: Send + Sync {
    /// 包装传入的传输。
    fn wrap(&self, transport: Box<dyn Transport>) -> Box<dyn Transport>;
}
