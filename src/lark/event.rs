//! 飞书事件回调的数据结构（兼容 v1 与 schema 2.0）
//!
//! 消息的 `content` 通常是 JSON 字符串（如 `{"text":"hi"}`、`{"image_key":"img_xxx"}`），
//! 少数转发 / 旧版回调会直接给对象。这里统一成宽松解析：内容格式异常时不报错。

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// 事件回调顶层
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    pub schema: Option<String>,
    /// v1：`url_verification` / `event_callback`
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub challenge: Option<String>,
    /// v1 的 Verification Token
    pub token: Option<String>,
    pub header: Option<EventHeader>,
    pub event: Option<EventData>,
    /// 配置了 Encrypt Key 时的加密体
    pub encrypt: Option<String>,
}

/// schema 2.0 事件头
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventHeader {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub create_time: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub event_id: Option<String>,
    pub sender: Option<Sender>,
    pub message: Option<MessageData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    pub sender_id: Option<UserId>,
    pub sender_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserId {
    pub open_id: Option<String>,
    pub user_id: Option<String>,
    pub union_id: Option<String>,
}

/// 消息中的 @ 信息
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mention {
    /// 文本中的占位符，如 `@_user_1`
    pub key: Option<String>,
    pub id: Option<UserId>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageData {
    pub message_id: Option<String>,
    pub chat_id: Option<String>,
    /// p2p / group
    pub chat_type: Option<String>,
    pub message_type: Option<String>,
    /// JSON 字符串或对象
    pub content: Option<Value>,
    /// 毫秒时间戳（字符串或数字）
    pub create_time: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub mentions: Vec<Mention>,
}

/// `"mentions": null` 视为空列表
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// 可下载的消息资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    File,
}

impl ResourceKind {
    /// 下载接口的 `type` 参数
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::File => "file",
        }
    }

    /// content JSON 中对应的 key 字段
    pub fn key_field(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image_key",
            ResourceKind::File => "file_key",
        }
    }

    /// 按 message_type 判断；非 image/file 返回 None
    pub fn from_message_type(message_type: &str) -> Option<Self> {
        match message_type {
            "image" => Some(ResourceKind::Image),
            "file" => Some(ResourceKind::File),
            _ => None,
        }
    }
}

impl EventPayload {
    /// 事件类型：优先 header.event_type，其次 event.type
    pub fn event_type(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|h| h.event_type.as_deref())
            .or_else(|| self.event.as_ref().and_then(|e| e.type_.as_deref()))
    }

    pub fn event_id(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|h| h.event_id.as_deref())
            .or_else(|| self.event.as_ref().and_then(|e| e.event_id.as_deref()))
            .filter(|id| !id.is_empty())
    }

    /// 校验用的 token：schema 2.0 在 header 中，v1 在顶层
    pub fn verification_token(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|h| h.token.as_deref())
            .or(self.token.as_deref())
    }

    pub fn is_message_event(&self) -> bool {
        self.event_type().is_some_and(|t| t.contains("message"))
    }

    pub fn message(&self) -> Option<&MessageData> {
        self.event.as_ref().and_then(|e| e.message.as_ref())
    }

    pub fn sender_open_id(&self) -> Option<&str> {
        self.event.as_ref().and_then(|e| e.sender_open_id())
    }
}

impl EventData {
    pub fn sender_open_id(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .and_then(|s| s.sender_id.as_ref())
            .and_then(|id| id.open_id.as_deref())
    }
}

impl MessageData {
    pub fn message_type(&self) -> &str {
        self.message_type.as_deref().unwrap_or("")
    }

    pub fn is_group(&self) -> bool {
        self.chat_type.as_deref() == Some("group")
    }

    fn content(&self) -> &Value {
        static EMPTY: Value = Value::Null;
        self.content.as_ref().unwrap_or(&EMPTY)
    }

    /// 文本消息的正文（已去首尾空白）
    pub fn text(&self) -> String {
        parse_text_content(self.content())
    }

    /// 图片 / 文件消息的资源 key
    pub fn resource_key(&self, kind: ResourceKind) -> Option<String> {
        resource_key(self.content(), kind)
    }

    /// 文件消息附带的文件名
    pub fn file_name(&self) -> Option<String> {
        content_field(self.content(), "file_name")
    }

    pub fn create_time_ms(&self) -> i64 {
        create_time_ms(self.create_time.as_ref())
    }
}

/// content 中的 JSON 对象：对象原样使用，字符串再解析一次
fn content_object(content: &Value) -> Option<Map<String, Value>> {
    match content {
        Value::Object(obj) => Some(obj.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(obj)) => Some(obj),
            _ => None,
        },
        _ => None,
    }
}

/// `{"text":"..."}` 取 text；字符串内容不是 JSON 对象时把原文当作正文
pub fn parse_text_content(content: &Value) -> String {
    if let Some(obj) = content_object(content) {
        return obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
    }
    match content {
        Value::String(raw) => raw.trim().to_string(),
        _ => String::new(),
    }
}

/// 取 `image_key` / `file_key`；内容异常或为空时返回 None
pub fn resource_key(content: &Value, kind: ResourceKind) -> Option<String> {
    content_field(content, kind.key_field())
}

fn content_field(content: &Value, field: &str) -> Option<String> {
    content_object(content)?
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// 毫秒时间戳：兼容字符串与数字，缺失或非法时为 0
pub fn create_time_ms(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}
