//! 同步子系统
//!
//! - [`merge`]：可见集的并集/去重/墓碑合并算法
//! - [`engine`]：单会话的双通道消息同步引擎

pub mod engine;
pub mod merge;

pub use engine::{MessageSyncEngine, SyncEngineConfig};
pub use merge::{merge_live_frame, merge_pull, MergeOutcome};
