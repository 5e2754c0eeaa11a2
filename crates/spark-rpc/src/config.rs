//! 配置文档中的时长字段以毫秒整数书写。

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// 反序列化 `Option<u64>` 毫秒为 `Option<Duration>`。
pub(crate) fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
}
