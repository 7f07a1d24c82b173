//! 时间处理工具模块
//!
//! 服务端下发的 `timestamp` 是 ISO-8601 字符串，但不保证统一：
//! 历史接口可能带微秒不带时区（naive，按 UTC 处理），网关层转发的
//! 实时帧可能是完整 RFC3339。排序键解析必须两种都接受，
//! 解析失败退回 UNIX 纪元（排在最前，由下一次拉取纠正）。

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

/// 解析服务端时间戳字符串
///
/// 依次尝试 RFC3339 和 naive ISO-8601（按 UTC 解释），都失败返回 None
pub fn parse_server_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    None
}

/// 消息排序键
///
/// 可见集按此键升序排列；无法解析的时间戳按纪元处理，保持可排序
pub fn sort_key(raw: &str) -> DateTime<Utc> {
    parse_server_timestamp(raw).unwrap_or_else(|| {
        debug!("Unparseable server timestamp, sorting at epoch: {:?}", raw);
        DateTime::<Utc>::UNIX_EPOCH
    })
}
