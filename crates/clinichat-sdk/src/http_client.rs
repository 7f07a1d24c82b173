//! HTTP 传输模块 - 历史拉取 / 发送回退 / 文件上传 / 已读回执
//!
//! 本模块提供引擎依赖的全部请求/响应式后端调用，使用 reqwest 作为
//! 底层 HTTP 客户端。拉取是正确性兜底通道：实时通道尽力而为，
//! 周期性全量拉取保证最终一致。
//!
//! 引擎通过 [`ChatTransport`] trait 消费本模块，测试时可替换为内存实现。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ClinichatSDKError, Result};
use crate::message::{ChatMessage, OutgoingMessage};
use crate::sdk::HttpClientConfig;

/// 文件上传响应
///
/// 服务端返回持久文件引用（file_url），供第二阶段投递时写入消息体
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileUploadResponse {
    pub file_url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// 请求/响应式后端调用的抽象
///
/// 由 [`ChatHttpClient`] 实现；所有接口契约归服务端所有，
/// 本层只做编解码与错误归一
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// 拉取一个会话的全量历史（服务端只返回未删除消息，但不保证顺序）
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>>;

    /// HTTP 发送回退（实时通道不可用时的投递路径）
    async fn send_message(&self, conversation_id: &str, outgoing: &OutgoingMessage) -> Result<()>;

    /// 上传附件，换取持久文件引用
    async fn upload_file(
        &self,
        conversation_id: &str,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<FileUploadResponse>;

    /// 标记消息已读（服务端幂等，响应体忽略）
    async fn mark_read(&self, message_id: &str) -> Result<()>;

    /// 经 WhatsApp 中继发送文本（中继结果经正常拉取路径回流）
    async fn send_whatsapp(&self, conversation_id: &str, body: &str) -> Result<()>;
}

/// HTTP 客户端（引擎的请求/响应通道）
#[derive(Debug)]
pub struct ChatHttpClient {
    client: Client,
    api_base_url: String,
    auth_token: Option<String>,
}

impl ChatHttpClient {
    /// 创建新的 HTTP 客户端
    pub fn new(
        config: &HttpClientConfig,
        api_base_url: String,
        auth_token: Option<String>,
    ) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| ClinichatSDKError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        info!("✅ HTTP 客户端已创建 (api_base_url: {})", api_base_url);

        Ok(Self {
            client,
            api_base_url,
            auth_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误信息".to_string());
        if status == StatusCode::NOT_FOUND {
            return Err(ClinichatSDKError::NotFound(message));
        }
        Err(ClinichatSDKError::Http {
            status: status.as_u16(),
            message,
        })
    }

    /// 历史接口可能直接返回数组，也可能包一层 {"messages": [...]}
    fn extract_message_array(json: Value) -> Vec<Value> {
        if let Value::Array(items) = json {
            return items;
        }
        if let Some(Value::Array(items)) = json.get("messages").cloned() {
            return items;
        }
        Vec::new()
    }
}

#[async_trait]
impl ChatTransport for ChatHttpClient {
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let url = self.endpoint(&format!("/chat/messages/{}", conversation_id));

        let response = self.with_auth(self.client.get(&url)).send().await?;
        let response = Self::check_status(response).await?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ClinichatSDKError::Serialization(format!("解析历史响应失败: {}", e)))?;

        // 逐条解析：单条坏数据只丢弃自身，不让整次拉取失败
        let mut messages = Vec::new();
        for item in Self::extract_message_array(json) {
            match serde_json::from_value::<ChatMessage>(item) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!("忽略无法解析的历史消息: {}", e),
            }
        }

        debug!(
            "📥 历史拉取完成: conversation_id={}, count={}",
            conversation_id,
            messages.len()
        );
        Ok(messages)
    }

    async fn send_message(&self, conversation_id: &str, outgoing: &OutgoingMessage) -> Result<()> {
        let url = self.endpoint(&format!("/chat/messages/{}", conversation_id));

        let response = self
            .with_auth(self.client.post(&url))
            .json(outgoing)
            .send()
            .await
            .map_err(|e| ClinichatSDKError::Transport(format!("HTTP 发送失败: {}", e)))?;
        Self::check_status(response).await?;

        debug!("📤 HTTP 投递成功: conversation_id={}", conversation_id);
        Ok(())
    }

    async fn upload_file(
        &self,
        conversation_id: &str,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<FileUploadResponse> {
        let url = self.endpoint(&format!("/chat/upload/{}", conversation_id));
        let file_size = bytes.len();

        // 1. 创建 multipart form
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| ClinichatSDKError::Upload(format!("创建 multipart part 失败: {}", e)))?;
        let form = multipart::Form::new().part("file", part);

        // 2. 发送请求
        info!("📤 开始上传文件: {} ({} bytes)", filename, file_size);
        let response = self
            .with_auth(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClinichatSDKError::Upload(format!("上传文件失败: {}", e)))?;
        let response = Self::check_status(response).await?;

        // 3. 解析响应
        let result: FileUploadResponse = response
            .json()
            .await
            .map_err(|e| ClinichatSDKError::Serialization(format!("解析上传响应失败: {}", e)))?;

        info!("✅ 文件上传成功: file_url={}", result.file_url);
        Ok(result)
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("/chat/messages/{}/read", message_id));

        let response = self.with_auth(self.client.put(&url)).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn send_whatsapp(&self, conversation_id: &str, body: &str) -> Result<()> {
        let url = self.endpoint(&format!("/chat/whatsapp/send/{}", conversation_id));

        let response = self
            .with_auth(self.client.post(&url))
            .json(&serde_json::json!({ "message": body }))
            .send()
            .await
            .map_err(|e| ClinichatSDKError::Transport(format!("WhatsApp 发送失败: {}", e)))?;
        Self::check_status(response).await?;

        debug!("📱 WhatsApp 中继投递成功: conversation_id={}", conversation_id);
        Ok(())
    }
}
