//! 实时通道连接状态
//!
//! 实时通道是尽力而为的低延迟推送通道，状态只反映可观测事实：
//! 通道断开不是错误，引擎会自动降级为仅轮询模式继续工作。

use serde::{Deserialize, Serialize};

/// 实时通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveChannelState {
    /// 连接中
    Connecting,
    /// 已连接，可写入实时帧
    Open,
    /// 已正常关闭
    Closed,
    /// 连接出错（不自动重连，重连由持有者重新 start）
    Errored,
}

impl LiveChannelState {
    /// 通道当前是否可用于发送实时帧
    pub fn is_open(&self) -> bool {
        matches!(self, LiveChannelState::Open)
    }

    /// 通道是否已终结（关闭或出错，后续只依赖轮询）
    pub fn is_terminal(&self) -> bool {
        matches!(self, LiveChannelState::Closed | LiveChannelState::Errored)
    }
}

impl std::fmt::Display for LiveChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveChannelState::Connecting => write!(f, "connecting"),
            LiveChannelState::Open => write!(f, "open"),
            LiveChannelState::Closed => write!(f, "closed"),
            LiveChannelState::Errored => write!(f, "errored"),
        }
    }
}
