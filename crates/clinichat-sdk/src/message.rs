//! SDK 消息模型定义
//!
//! 与服务端会话接口的 JSON 线格式对齐：拉取历史、实时帧、发送回退
//! 三条路径共用同一个 [`ChatMessage`] 结构。服务端以 `_id` 下发消息主键，
//! 实时帧偶尔以 `id` 下发，反序列化时两者都接受。

use serde::{Deserialize, Serialize};

/// 消息类型就是字符串，支持服务端扩展新类型而不破坏解析
pub type MessageKind = String;

/// 已知消息类型常量
///
/// 这些常量提供类型安全和 IDE 自动补全，未知类型按原样透传
pub mod message_kinds {
    /// 文本消息
    pub const TEXT: &str = "text";
    /// 图片消息（file_url 指向图片）
    pub const IMAGE: &str = "image";
    /// 文档消息（file_url 指向非图片附件）
    pub const DOCUMENT: &str = "document";
    /// 通用文件消息（旧版服务端上传接口写入的类型）
    pub const FILE: &str = "file";
    /// 经 WhatsApp 中继的消息
    pub const WHATSAPP: &str = "whatsapp";
    /// 系统消息（预约变更通知等）
    pub const SYSTEM: &str = "system";
}

/// 判断是否是已知的消息类型
pub fn is_known_kind(kind: &str) -> bool {
    matches!(
        kind,
        message_kinds::TEXT
            | message_kinds::IMAGE
            | message_kinds::DOCUMENT
            | message_kinds::FILE
            | message_kinds::WHATSAPP
            | message_kinds::SYSTEM
    )
}

/// 根据声明的 MIME 类型推断附件消息类型
///
/// `image/*` 推断为图片，其余一律按文档处理
pub fn kind_from_mime(mime_type: &str) -> &'static str {
    if mime_type.starts_with("image/") {
        message_kinds::IMAGE
    } else {
        message_kinds::DOCUMENT
    }
}

fn default_kind() -> MessageKind {
    message_kinds::TEXT.to_string()
}

/// 一条会话消息（服务端权威视图）
///
/// 除 `read_by` 只增不减、`deleted` 单向置位外，消息创建后不可变；
/// 客户端从不在本地伪造或删除消息，只请求变更并等待下一次拉取/推送观察结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 服务端分配的消息主键
    #[serde(rename = "_id", alias = "id")]
    pub id: String,

    /// 所属会话（预约）标识
    #[serde(default)]
    pub conversation_id: String,

    /// 发送者标识
    pub sender_id: String,

    /// 发送者角色（patient / doctor / system）
    pub sender_role: String,

    /// 文本内容；附件消息时为文件名
    pub message: String,

    /// 消息类型，缺省按文本处理
    #[serde(default = "default_kind")]
    pub message_type: MessageKind,

    /// 附件地址（图片/文档消息）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,

    /// WhatsApp 中继消息的外部标识
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp_sid: Option<String>,

    /// 已读参与者集合，只增不减
    #[serde(default)]
    pub read_by: Vec<String>,

    /// 服务端分配的发送时间（ISO-8601 字符串，可能不带时区）
    pub timestamp: String,

    /// 软删除标记（墓碑）；一旦为 true 永久排除出可见集
    #[serde(default)]
    pub deleted: bool,
}

/// 出站消息载荷（C→S）
///
/// 实时帧写入和 HTTP 发送回退携带完全相同的逻辑载荷
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub sender_id: String,
    pub sender_role: String,
    pub message: String,
    pub message_type: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl OutgoingMessage {
    /// 创建文本消息载荷
    pub fn text(sender_id: &str, sender_role: &str, body: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sender_role: sender_role.to_string(),
            message: body.to_string(),
            message_type: message_kinds::TEXT.to_string(),
            file_url: None,
        }
    }

    /// 创建附件消息载荷（类型由 MIME 推断）
    pub fn attachment(
        sender_id: &str,
        sender_role: &str,
        filename: &str,
        mime_type: &str,
        file_url: String,
    ) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sender_role: sender_role.to_string(),
            message: filename.to_string(),
            message_type: kind_from_mime(mime_type).to_string(),
            file_url: Some(file_url),
        }
    }
}
