//! SDK 门面 - 配置与引擎工厂
//!
//! 所有外部依赖（API 地址、WebSocket 地址、鉴权凭证、参与者身份）
//! 经构造参数显式注入，SDK 不读取任何环境全局量。
//! 每个会话的引擎独占一条实时通道与一个轮询定时器，互不共享。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ClinichatSDKError, Result};
use crate::http_client::ChatHttpClient;
use crate::live_channel::WsLiveChannel;
use crate::sync::{MessageSyncEngine, SyncEngineConfig};

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            request_timeout_secs: Some(300), // 文件上传可能需要较长时间
        }
    }
}

/// Clinichat SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinichatConfig {
    /// REST API 基础 URL（历史拉取/发送回退/上传/已读）
    pub api_base_url: String,
    /// WebSocket 基础 URL（实时通道）
    pub ws_base_url: String,
    /// 鉴权凭证（HTTP Bearer 头与 WebSocket 查询参数）
    pub auth_token: Option<String>,
    /// 当前参与者标识
    pub user_id: String,
    /// 当前参与者角色（patient / doctor）
    pub user_role: String,
    /// 周期拉取间隔（秒）
    pub pull_interval_secs: u64,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
}

impl Default for ClinichatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            ws_base_url: "ws://localhost:8000".to_string(),
            auth_token: None,
            user_id: String::new(),
            user_role: "patient".to_string(),
            pull_interval_secs: 3,
            event_buffer_size: 256,
            http_client_config: HttpClientConfig::default(),
        }
    }
}

impl ClinichatConfig {
    pub fn builder() -> ClinichatConfigBuilder {
        ClinichatConfigBuilder::new()
    }
}

/// 配置构建器
pub struct ClinichatConfigBuilder {
    config: ClinichatConfig,
}

impl ClinichatConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClinichatConfig::default(),
        }
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn ws_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.ws_base_url = url.into();
        self
    }

    pub fn auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn user_id<S: Into<String>>(mut self, user_id: S) -> Self {
        self.config.user_id = user_id.into();
        self
    }

    pub fn user_role<S: Into<String>>(mut self, user_role: S) -> Self {
        self.config.user_role = user_role.into();
        self
    }

    /// 设置周期拉取间隔（秒）
    pub fn pull_interval_secs(mut self, secs: u64) -> Self {
        self.config.pull_interval_secs = secs;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn build(self) -> ClinichatConfig {
        self.config
    }
}

impl Default for ClinichatConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Clinichat SDK
///
/// 持有共享的 HTTP 传输；按会话创建独立的同步引擎
#[derive(Debug)]
pub struct ClinichatSDK {
    config: ClinichatConfig,
    transport: Arc<ChatHttpClient>,
}

impl ClinichatSDK {
    /// 初始化 SDK
    pub fn initialize(config: ClinichatConfig) -> Result<Self> {
        if config.user_id.is_empty() {
            return Err(ClinichatSDKError::Config("user_id 不能为空".to_string()));
        }
        if config.pull_interval_secs == 0 {
            return Err(ClinichatSDKError::Config(
                "pull_interval_secs 必须大于 0".to_string(),
            ));
        }

        let transport = Arc::new(ChatHttpClient::new(
            &config.http_client_config,
            config.api_base_url.clone(),
            config.auth_token.clone(),
        )?);

        info!("✅ Clinichat SDK 已初始化: user_id={}", config.user_id);
        Ok(Self { config, transport })
    }

    /// 为一个会话创建同步引擎
    ///
    /// 引擎独占一条 WebSocket 连接与一个轮询定时器；
    /// 创建本身不发起 I/O，调用 start 后才开始同步
    pub fn engine(&self, conversation_id: &str) -> MessageSyncEngine {
        let live = Arc::new(WsLiveChannel::new(
            &self.config.ws_base_url,
            conversation_id,
            self.config.auth_token.as_deref().unwrap_or(""),
        ));

        let engine_config =
            SyncEngineConfig::new(conversation_id, &self.config.user_id, &self.config.user_role)
                .with_pull_interval(Duration::from_secs(self.config.pull_interval_secs))
                .with_event_buffer_size(self.config.event_buffer_size);

        MessageSyncEngine::new(engine_config, self.transport.clone(), live)
    }

    /// 当前配置
    pub fn config(&self) -> &ClinichatConfig {
        &self.config
    }
}
