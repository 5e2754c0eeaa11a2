use std::time::Duration;

/// 客户端与服务端的默认超时：3000 毫秒。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// 建连超时与套接字 I/O 超时。
///
/// # 契约（What）
/// - `connect`：建立传输（TCP 三次握手 + TLS 握手）的上界；Unix Domain Socket 忽略该字段；
/// - `socket`：建连后每次阻塞读写的上界；
/// - `None` 表示不设上界。零时长在构造时归一化为 `None`，标准库拒绝零超时。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub connect: Option<Duration>,
    pub socket: Option<Duration>,
}

impl TimeoutConfig {
    /// 分别指定建连与 I/O 超时。
    pub fn new(connect: Option<Duration>, socket: Option<Duration>) -> Self {
        Self {
            connect: normalize(connect),
            socket: normalize(socket),
        }
    }

    /// 两个超时取同一值。
    pub fn uniform(timeout: Duration) -> Self {
        Self::new(Some(timeout), Some(timeout))
    }

    /// 不设任何上界。
    pub const fn unbounded() -> Self {
        Self {
            connect: None,
            socket: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::uniform(DEFAULT_TIMEOUT)
    }
}

fn normalize(value: Option<Duration>) -> Option<Duration> {
    value.filter(|duration| !duration.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_durations_mean_unbounded() {
        let config = TimeoutConfig::new(Some(Duration::ZERO), Some(Duration::from_millis(10)));
        assert_eq!(config.connect, None);
        assert_eq!(config.socket, Some(Duration::from_millis(10)));
    }

    #[test]
    fn default_is_three_seconds_each() {
        let config = TimeoutConfig::default();
        assert_eq!(config.connect, Some(DEFAULT_TIMEOUT));
        assert_eq!(config.socket, Some(DEFAULT_TIMEOUT));
    }
}
