//! 合并/去重算法 - 双通道消息调和的核心
//!
//! 可见集 V 以消息 id 为键，两条规则贯穿所有合并：
//!
//! - 并集语义：拉取结果是"至少这些为真"，消息一旦进入 V，
//!   不会仅因后续拉取缺失而被移除（防止截断/部分响应掩盖已知消息）
//! - 墓碑清除：仅在全量拉取合并时执行；单帧合并不清除，
//!   已删除消息的实时帧即便出现，也由下一轮拉取纠正
//!
//! 任何插入后按服务端时间戳稳定重排，时间相同保持到达顺序。

use std::collections::HashSet;

use tracing::debug;

use crate::message::ChatMessage;
use crate::utils::time::sort_key;

/// 一次合并的结果
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// 新并入可见集的消息 id（按并入顺序）
    pub added: Vec<String>,
    /// 因墓碑被清除的消息数
    pub removed: usize,
    /// 可见集是否发生任何变化（含已读集合增长）
    pub changed: bool,
}

impl MergeOutcome {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// 全量拉取合并
///
/// 1. 墓碑清除：拉取结果中 deleted 的消息从 V 移除，且不再并入
/// 2. 并集：拉取结果中 V 未知的 id 追加进 V
/// 3. 已读集合刷新：V 已知消息的 read_by 只增量并入，从不收缩
/// 4. 稳定重排：按 timestamp 升序，相同时间保持原有相对顺序
pub fn merge_pull(visible: &mut Vec<ChatMessage>, fetched: Vec<ChatMessage>) -> MergeOutcome {
    let mut outcome = MergeOutcome::unchanged();

    // 墓碑清除（仅全量拉取）
    let tombstones: HashSet<String> = fetched
        .iter()
        .filter(|m| m.deleted)
        .map(|m| m.id.clone())
        .collect();
    if !tombstones.is_empty() {
        let before = visible.len();
        visible.retain(|m| !tombstones.contains(&m.id));
        outcome.removed = before - visible.len();
        if outcome.removed > 0 {
            debug!("🪦 墓碑清除: removed={}", outcome.removed);
        }
    }

    let mut known: HashSet<String> = visible.iter().map(|m| m.id.clone()).collect();
    let mut inserted = false;

    for incoming in fetched {
        if incoming.deleted {
            continue;
        }
        if known.contains(&incoming.id) {
            // 已知消息只刷新服务端权威的可变字段：read_by 只增不减
            if let Some(existing) = visible.iter_mut().find(|m| m.id == incoming.id) {
                for reader in incoming.read_by {
                    if !existing.read_by.contains(&reader) {
                        existing.read_by.push(reader);
                        outcome.changed = true;
                    }
                }
            }
            continue;
        }
        known.insert(incoming.id.clone());
        outcome.added.push(incoming.id.clone());
        visible.push(incoming);
        inserted = true;
    }

    if inserted || outcome.removed > 0 {
        resort(visible);
        outcome.changed = true;
    }
    outcome
}

/// 单条实时帧合并
///
/// 墓碑帧与重复 id 一律忽略；新消息追加后稳定重排
pub fn merge_live_frame(visible: &mut Vec<ChatMessage>, message: ChatMessage) -> MergeOutcome {
    if message.deleted {
        debug!("忽略已删除消息的实时帧: id={}", message.id);
        return MergeOutcome::unchanged();
    }
    if visible.iter().any(|m| m.id == message.id) {
        debug!("🔄 检测到重复消息: id={}", message.id);
        return MergeOutcome::unchanged();
    }

    let mut outcome = MergeOutcome::unchanged();
    outcome.added.push(message.id.clone());
    outcome.changed = true;
    visible.push(message);
    resort(visible);
    outcome
}

/// 稳定重排：sort_by 保证相同时间戳的消息保持插入顺序
fn resort(visible: &mut [ChatMessage]) {
    visible.sort_by(|a, b| sort_key(&a.timestamp).cmp(&sort_key(&b.timestamp)));
}
