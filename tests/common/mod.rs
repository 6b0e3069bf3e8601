//! 集成测试共用的假实现

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde_json::json;
use skylark::bot::{DispatchSettings, Dispatcher};
use skylark::core::{BotError, Result};
use skylark::lark::{EventPayload, LarkApi, Resource, ResourceKind};
use skylark::llm::{Assistant, ModelSet};
use skylark::store::{ChatDefaults, MemoryStore, MessageStore};

/// 记录所有发出的消息；资源按 key 预置
#[derive(Default)]
pub struct RecordingLark {
    sent: Mutex<Vec<(String, String)>>,
    resources: Mutex<HashMap<String, Resource>>,
}

impl RecordingLark {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_resource(&self, key: &str, resource: Resource) {
        self.resources.lock().unwrap().insert(key.to_string(), resource);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    /// 等待至少 n 条消息（最多 2 秒）
    pub async fn wait_for(&self, n: usize) -> Vec<(String, String)> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl LarkApi for RecordingLark {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn get_message_resource(
        &self,
        _message_id: &str,
        key: &str,
        _kind: ResourceKind,
    ) -> Result<Resource> {
        self.resources
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| BotError::LarkStatus {
                status: 404,
                body: "resource not found".into(),
            })
    }
}

pub fn models() -> ModelSet {
    ModelSet {
        chat: "chat".into(),
        summary: "summary".into(),
        vision: "vision".into(),
    }
}

pub fn degraded_assistant() -> Assistant {
    Assistant::new(None, models(), 256)
}

pub fn taipei() -> Tz {
    chrono_tz::Asia::Taipei
}

pub fn settings(require_mention: bool) -> DispatchSettings {
    DispatchSettings {
        bot_name: "Skygpt".into(),
        bot_open_id: Some("ou_bot".into()),
        require_mention,
        tz: taipei(),
        defaults: ChatDefaults::default(),
    }
}

pub struct Harness {
    pub store: Arc<dyn MessageStore>,
    pub lark: Arc<RecordingLark>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn harness(require_mention: bool) -> Harness {
    let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new(ChatDefaults::default()));
    let lark = RecordingLark::new();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        lark.clone() as Arc<dyn LarkApi>,
        degraded_assistant(),
        settings(require_mention),
    ));
    Harness {
        store,
        lark,
        dispatcher,
    }
}

/// 构造 schema 2.0 的 im.message.receive_v1 事件
pub fn message_event(
    event_id: &str,
    chat_type: &str,
    message_type: &str,
    content: serde_json::Value,
    mentions: serde_json::Value,
) -> serde_json::Value {
    json!({
        "schema": "2.0",
        "header": {
            "event_id": event_id,
            "event_type": "im.message.receive_v1",
            "create_time": "1714521600000",
            "token": "verify-me"
        },
        "event": {
            "sender": {"sender_id": {"open_id": "ou_user"}, "sender_type": "user"},
            "message": {
                "message_id": format!("om_{}", event_id),
                "chat_id": "oc_chat",
                "chat_type": chat_type,
                "message_type": message_type,
                "content": content.to_string(),
                "mentions": mentions
            }
        }
    })
}

pub fn text_event(event_id: &str, chat_type: &str, text: &str) -> serde_json::Value {
    message_event(event_id, chat_type, "text", json!({ "text": text }), json!([]))
}

pub fn payload(value: serde_json::Value) -> EventPayload {
    serde_json::from_value(value).unwrap()
}
