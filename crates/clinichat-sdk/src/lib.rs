//! Clinichat SDK - 诊疗会话实时消息同步 SDK
//!
//! 本 SDK 为医患预约会话提供双通道消息同步能力，包括：
//! - 🔀 双通道调和：实时 WebSocket 推送 + 周期全量拉取，合并去重
//! - 📥 至少一次投递语义下的幂等合并（以消息 id 为键的并集）
//! - 🪦 墓碑清除：服务端软删除的消息在下一轮拉取中移出可见集
//! - 📤 出站发送：实时通道优先，不可用时自动回退 HTTP 投递
//! - 📎 附件上传：两阶段（先换取持久文件引用，再投递消息）
//! - ⚙️ 事件系统：可见集变更、新消息、通道状态的广播订阅
//! - 🧵 并发安全：每会话单任务串行合并，读者永远看到一致快照
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use clinichat_sdk::{ClinichatSDK, ClinichatConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 配置 SDK（所有依赖显式注入，不读环境全局量）
//!     let config = ClinichatConfig::builder()
//!         .api_base_url("https://clinic.example.com")
//!         .ws_base_url("wss://clinic.example.com")
//!         .auth_token("token")
//!         .user_id("user123")
//!         .user_role("patient")
//!         .build();
//!
//!     let sdk = ClinichatSDK::initialize(config)?;
//!
//!     // 每个会话一个引擎，独占通道与定时器
//!     let engine = sdk.engine("apt_1");
//!     engine.start().await?;
//!
//!     // 发送消息（实时优先，自动回退 HTTP）
//!     engine.send("你好，医生").await?;
//!
//!     // 读取可见消息快照
//!     for msg in engine.visible_messages() {
//!         println!("{}: {}", msg.sender_id, msg.message);
//!     }
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod connection_state;
pub mod error;
pub mod events;
pub mod http_client;
pub mod live_channel;
pub mod message;
pub mod sdk;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use connection_state::LiveChannelState;
pub use error::{ClinichatSDKError, Result};
pub use events::{ChatEvent, EventManager, EventStats};
pub use http_client::{ChatHttpClient, ChatTransport, FileUploadResponse};
pub use live_channel::{LiveChannel, LiveEvent, WsLiveChannel};
pub use message::{
    is_known_kind, kind_from_mime, message_kinds, ChatMessage, MessageKind, OutgoingMessage,
};
pub use sdk::{ClinichatConfig, ClinichatConfigBuilder, ClinichatSDK, HttpClientConfig};
pub use sync::{MessageSyncEngine, SyncEngineConfig};
pub use version::SDK_VERSION;
