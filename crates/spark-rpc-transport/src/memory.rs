use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    Result, Transport,
    error::{FLUSH, READ, TransportError, WRITE},
};

#[derive(Debug, Default)]
struct MemoryState {
    input: VecDeque<u8>,
    output: Vec<u8>,
    open: bool,
    opens: usize,
    closes: usize,
}

/// 进程内字节缓冲传输。
///
/// 克隆得到的句柄共享同一份状态：把一份交给被测代码，另一份留作探针，
/// 即可预置输入、检查输出并统计 `open`/`close` 次数。输入耗尽时 `read` 返回 `0`，
/// 与对端关闭的语义一致。
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// 构造一个已打开、输入为空的传输。
    pub fn new() -> Self {
        Self::with_input(Vec::new())
    }

    /// 构造一个已打开并预置输入的传输。
    pub fn with_input(input: Vec<u8>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                input: input.into(),
                open: true,
                ..MemoryState::default()
            })),
        }
    }

    /// 构造一个尚未打开的传输，需先调用 `open`。
    pub fn unopened() -> Self {
        let transport = Self::new();
        transport.lock().open = false;
        transport
    }

    /// 追加可读字节。
    pub fn push_input(&self, bytes: &[u8]) {
        self.lock().input.extend(bytes.iter().copied());
    }

    /// 已写出的全部字节。
    pub fn written(&self) -> Vec<u8> {
        self.lock().output.clone()
    }

    /// 取走已写出的字节并清空。
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().output)
    }

    /// `open` 被调用的次数。
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    /// `close` 被调用的次数（包括重复调用）。
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.opens += 1;
        state.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.closes += 1;
        state.open = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::NotOpen { kind: READ });
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::NotOpen { kind: WRITE });
        }
        state.output.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.lock().open {
            return Err(TransportError::NotOpen { kind: FLUSH });
        }
        Ok(())
    }
}
