use tracing::debug;

use crate::{Result, Transport, TransportFactory};

/// 默认缓冲区容量（字节）。
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// 带读预取与写合并的缓冲传输。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 编码层按字段逐个读写小块数据，直接落到套接字会产生大量系统调用；缓冲层把它们合并。
///
/// ## 逻辑（How）
/// - 读：缓冲区耗尽时向内层发起一次最多 `capacity` 字节的读取；请求大于容量时直接透传；
/// - 写：追加到写缓冲，超过容量时先推送；`flush` 推送剩余数据并刷新内层。
///
/// ## 契约（What）
/// - `close` 先尽力推送写缓冲，再关闭内层；推送失败不会阻止关闭，错误被记录并丢弃；
/// - 未调用 `flush` 的数据不保证到达对端。
pub struct BufferedTransport {
    inner: Box<dyn Transport>,
    capacity: usize,
    read_buf: Vec<u8>,
    read_pos: usize,
    write_buf: Vec<u8>,
}

impl BufferedTransport {
    /// 以默认容量包装传输。
    pub fn new(inner: Box<dyn Transport>) -> Self {
        Self::with_capacity(inner, DEFAULT_BUFFER_CAPACITY)
    }

    /// 以指定容量包装传输，容量至少为 1。
    pub fn with_capacity(inner: Box<dyn Transport>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            capacity,
            read_buf: Vec::with_capacity(capacity),
            read_pos: 0,
            write_buf: Vec::with_capacity(capacity),
        }
    }

    /// 取回内层传输，未推送的写缓冲会被丢弃。
    pub fn into_inner(self) -> Box<dyn Transport> {
        self.inner
    }

    fn buffered(&self) -> &[u8] {
        &self.read_buf[self.read_pos..]
    }

    fn push_writes(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let result = self.inner.write(&self.write_buf);
        self.write_buf.clear();
        result
    }
}

impl Transport for BufferedTransport {
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn close(&mut self) -> Result<()> {
        if self.inner.is_open()
            && let Err(err) = self.push_writes()
        {
            debug!(code = err.code(), error = %err, "discarding buffered writes on close");
        }
        self.write_buf.clear();
        self.read_buf.clear();
        self.read_pos = 0;
        self.inner.close()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered().is_empty() {
            if buf.len() >= self.capacity {
                return self.inner.read(buf);
            }
            self.read_buf.resize(self.capacity, 0);
            let n = self.inner.read(&mut self.read_buf)?;
            self.read_buf.truncate(n);
            self.read_pos = 0;
            if n == 0 {
                return Ok(0);
            }
        }
        let available = self.buffered();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.write_buf.len() + buf.len() > self.capacity {
            self.push_writes()?;
        }
        if buf.len() >= self.capacity {
            return self.inner.write(buf);
        }
        self.write_buf.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.push_writes()?;
        self.inner.flush()
    }
}

/// 默认的缓冲层工厂。
#[derive(Clone, Copy, Debug)]
pub struct BufferedTransportFactory {
    capacity: usize,
}

impl BufferedTransportFactory {
    /// 指定缓冲容量。
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// 缓冲容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BufferedTransportFactory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

impl TransportFactory for BufferedTransportFactory {
    fn wrap(&self, transport: Box<dyn Transport>) -> Box<dyn Transport> {
        Box::new(BufferedTransport::with_capacity(transport, self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTransport;

    #[test]
    fn writes_stay_buffered_until_flush() {
        let memory = MemoryTransport::new();
        let view = memory.clone();
        let mut buffered = BufferedTransport::with_capacity(Box::new(memory), 16);

        buffered.write(b"hello").unwrap();
        assert!(view.written().is_empty());

        buffered.flush().unwrap();
        assert_eq!(view.written(), b"hello");
    }

    #[test]
    fn oversized_writes_bypass_the_buffer() {
        let memory = MemoryTransport::new();
        let view = memory.clone();
        let mut buffered = BufferedTransport::with_capacity(Box::new(memory), 4);

        buffered.write(b"ab").unwrap();
        buffered.write(b"0123456789").unwrap();
        assert_eq!(view.written(), b"ab0123456789");
    }

    #[test]
    fn reads_are_served_from_the_prefetch_buffer() {
        let memory = MemoryTransport::with_input(b"abcdef".to_vec());
        let mut buffered = BufferedTransport::with_capacity(Box::new(memory), 8);

        let mut first = [0u8; 2];
        buffered.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"ab");

        let mut rest = [0u8; 4];
        buffered.read_exact(&mut rest).unwrap();
        assert_eq!(&rest, b"cdef");

        let mut more = [0u8; 1];
        assert_eq!(buffered.read(&mut more).unwrap(), 0);
    }

    #[test]
    fn close_flushes_pending_writes_and_closes_inner() {
        let memory = MemoryTransport::new();
        let view = memory.clone();
        let mut buffered = BufferedTransport::new(Box::new(memory));

        buffered.write(b"bye").unwrap();
        buffered.close().unwrap();
        buffered.close().unwrap();

        assert_eq!(view.written(), b"bye");
        assert!(!view.is_open());
        assert_eq!(view.close_count(), 2);
    }
}
