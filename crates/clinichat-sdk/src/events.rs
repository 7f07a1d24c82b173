//! 事件系统模块 - 向消费方（UI 等）推送引擎状态变化
//!
//! 功能包括：
//! - 可见消息集变更事件
//! - 新消息合并事件
//! - 实时通道状态变更事件
//! - 事件广播和订阅机制
//!
//! 消费方既可以订阅事件流获得推送，也可以在任意时刻直接读取
//! 引擎的 `visible_messages()` 快照，两者观察到的是同一份状态。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;

use crate::connection_state::LiveChannelState;

/// SDK 事件类型
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// 可见消息集发生变化（合并产生了实际变更后发出）
    VisibleMessagesChanged {
        conversation_id: String,
        /// 变更后的可见消息数
        count: usize,
        timestamp: u64,
    },
    /// 新消息并入可见集
    MessageReceived {
        conversation_id: String,
        message_id: String,
        timestamp: u64,
    },
    /// 实时通道状态变更
    LiveChannelStateChanged {
        conversation_id: String,
        old_state: LiveChannelState,
        new_state: LiveChannelState,
        timestamp: u64,
    },
}

impl ChatEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::VisibleMessagesChanged { .. } => "visible_messages_changed",
            ChatEvent::MessageReceived { .. } => "message_received",
            ChatEvent::LiveChannelStateChanged { .. } => "live_channel_state_changed",
        }
    }

    /// 获取事件关联的会话ID
    pub fn conversation_id(&self) -> &str {
        match self {
            ChatEvent::VisibleMessagesChanged { conversation_id, .. } => conversation_id,
            ChatEvent::MessageReceived { conversation_id, .. } => conversation_id,
            ChatEvent::LiveChannelStateChanged { conversation_id, .. } => conversation_id,
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> u64 {
        match self {
            ChatEvent::VisibleMessagesChanged { timestamp, .. } => *timestamp,
            ChatEvent::MessageReceived { timestamp, .. } => *timestamp,
            ChatEvent::LiveChannelStateChanged { timestamp, .. } => *timestamp,
        }
    }
}

/// 当前 UNIX 秒时间戳（事件时间）
pub(crate) fn event_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<ChatEvent>,
    /// 事件统计
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: ChatEvent) {
        debug!("Emitting event: {}", event.event_type());

        // 更新统计
        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 广播事件（无订阅者时 send 会失败，属正常场景如无 UI 的轮询消费方，仅打 debug）
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    /// 获取事件统计
    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
