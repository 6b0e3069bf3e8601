//! 内存存储：进程内 HashMap，重启即丢失
//!
//! 消息按写入顺序保留最近 [`DEFAULT_MAX_MESSAGES`] 条，超出后丢弃最早的记录
//! （连同其 message_id 去重标记）。群聊设置与摘要锁不做淘汰。

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::Result;
use crate::store::{ChatDefaults, ChatRecord, MessageStore, ScheduleUpdate, StoredMessage};

/// 默认最多保留的消息条数
pub const DEFAULT_MAX_MESSAGES: usize = 100_000;

#[derive(Default)]
struct Inner {
    chats: HashMap<String, ChatRecord>,
    messages: VecDeque<StoredMessage>,
    message_ids: HashSet<String>,
    locks: HashSet<(String, String)>,
}

/// 内存存储
pub struct MemoryStore {
    inner: RwLock<Inner>,
    defaults: ChatDefaults,
    max_messages: usize,
}

impl MemoryStore {
    pub fn new(defaults: ChatDefaults) -> Self {
        Self::with_max_messages(defaults, DEFAULT_MAX_MESSAGES)
    }

    pub fn with_max_messages(defaults: ChatDefaults, max_messages: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            defaults,
            max_messages: max_messages.max(1),
        }
    }

    /// 取出或按默认设置创建群记录
    fn chat_entry<'a>(&self, inner: &'a mut Inner, chat_id: &str) -> &'a mut ChatRecord {
        inner
            .chats
            .entry(chat_id.to_string())
            .or_insert_with(|| self.defaults.new_chat(chat_id, now_ms()))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_chat(&self, chat_id: &str, name: Option<&str>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let chat = self.chat_entry(&mut inner, chat_id);
        if let Some(name) = name {
            chat.name = Some(name.to_string());
        }
        chat.last_seen_ms = now_ms();
        Ok(())
    }

    async fn set_chat_enabled(&self, chat_id: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        self.chat_entry(&mut inner, chat_id).enabled = enabled;
        Ok(())
    }

    async fn set_chat_schedule(&self, chat_id: &str, update: ScheduleUpdate) -> Result<()> {
        let mut inner = self.inner.write().await;
        let chat = self.chat_entry(&mut inner, chat_id);
        if let Some(hour) = update.hour {
            chat.summary_hour = hour.min(23);
        }
        if let Some(tz) = update.tz {
            chat.tz = tz;
        }
        if let Some(lang) = update.lang {
            chat.lang = lang;
        }
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        Ok(self.inner.read().await.chats.get(chat_id).cloned())
    }

    async fn enabled_chats(&self) -> Result<Vec<ChatRecord>> {
        let inner = self.inner.read().await;
        let mut chats: Vec<ChatRecord> =
            inner.chats.values().filter(|c| c.enabled).cloned().collect();
        chats.sort_by(|a, b| a.chat_id.cmp(&b.chat_id));
        Ok(chats)
    }

    async fn save_message(&self, message: &StoredMessage) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match &message.message_id {
            Some(id) => {
                if !inner.message_ids.insert(id.clone()) {
                    return Ok(false);
                }
            }
            None => {
                let duplicate = inner.messages.iter().any(|m| {
                    m.chat_id == message.chat_id && m.ts_ms == message.ts_ms && m.text == message.text
                });
                if duplicate {
                    return Ok(false);
                }
            }
        }
        inner.messages.push_back(message.clone());
        while inner.messages.len() > self.max_messages {
            let Some(evicted) = inner.messages.pop_front() else {
                break;
            };
            if let Some(id) = evicted.message_id {
                inner.message_ids.remove(&id);
            }
        }
        Ok(true)
    }

    async fn messages_between(
        &self,
        chat_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredMessage>> {
        let inner = self.inner.read().await;
        let mut out: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id && m.ts_ms >= start_ms && m.ts_ms < end_ms)
            .cloned()
            .collect();
        // 稳定排序，同一毫秒内保持写入顺序
        out.sort_by_key(|m| m.ts_ms);
        Ok(out)
    }

    async fn acquire_summary_lock(&self, summary_date: &str, chat_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .locks
            .insert((summary_date.to_string(), chat_id.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    fn msg(chat: &str, id: Option<&str>, ts: i64, text: &str) -> StoredMessage {
        StoredMessage {
            chat_id: chat.into(),
            message_id: id.map(String::from),
            ts_ms: ts,
            text: Some(text.into()),
            msg_type: Some("text".into()),
            ..Default::default()
        }
    }

    async fn stores() -> Vec<Arc<dyn MessageStore>> {
        let sqlite = SqliteStore::new_in_memory(ChatDefaults::default()).unwrap();
        sqlite.init().await.unwrap();
        vec![
            Arc::new(MemoryStore::new(ChatDefaults::default())),
            Arc::new(sqlite),
        ]
    }

    #[tokio::test]
    async fn test_save_message_dedupe() {
        for store in stores().await {
            assert!(store.save_message(&msg("oc_1", Some("om_1"), 10, "a")).await.unwrap());
            assert!(!store.save_message(&msg("oc_1", Some("om_1"), 11, "b")).await.unwrap());
            assert!(store.save_message(&msg("oc_1", None, 20, "c")).await.unwrap());
            assert!(!store.save_message(&msg("oc_1", None, 20, "c")).await.unwrap());
            assert!(store.save_message(&msg("oc_1", None, 20, "d")).await.unwrap());
            assert_eq!(store.messages_between("oc_1", 0, 100).await.unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_messages_between_half_open_and_sorted() {
        for store in stores().await {
            store.save_message(&msg("oc_1", Some("m3"), 300, "c")).await.unwrap();
            store.save_message(&msg("oc_1", Some("m1"), 100, "a")).await.unwrap();
            store.save_message(&msg("oc_1", Some("m2"), 200, "b")).await.unwrap();
            store.save_message(&msg("oc_2", Some("m4"), 150, "x")).await.unwrap();

            let got = store.messages_between("oc_1", 100, 300).await.unwrap();
            let texts: Vec<_> = got.iter().filter_map(|m| m.text.as_deref()).collect();
            assert_eq!(texts, vec!["a", "b"]);
        }
    }

    #[tokio::test]
    async fn test_chat_settings() {
        for store in stores().await {
            assert!(store.get_chat("oc_1").await.unwrap().is_none());
            store.upsert_chat("oc_1", Some("群一")).await.unwrap();
            store.upsert_chat("oc_2", None).await.unwrap();
            store.set_chat_enabled("oc_2", false).await.unwrap();

            let chat = store.get_chat("oc_1").await.unwrap().unwrap();
            assert!(chat.enabled);
            assert_eq!(chat.summary_hour, 8);
            assert_eq!(chat.lang, "zh");

            store
                .set_chat_schedule(
                    "oc_3",
                    ScheduleUpdate {
                        hour: Some(99),
                        tz: Some("UTC".into()),
                        lang: None,
                    },
                )
                .await
                .unwrap();
            let chat = store.get_chat("oc_3").await.unwrap().unwrap();
            assert_eq!(chat.summary_hour, 23);
            assert_eq!(chat.tz, "UTC");

            let enabled: Vec<String> = store
                .enabled_chats()
                .await
                .unwrap()
                .into_iter()
                .map(|c| c.chat_id)
                .collect();
            assert_eq!(enabled, vec!["oc_1".to_string(), "oc_3".to_string()]);

            // upsert 不会重新开启
            store.upsert_chat("oc_2", None).await.unwrap();
            assert!(!store.get_chat("oc_2").await.unwrap().unwrap().enabled);
        }
    }

    #[tokio::test]
    async fn test_oldest_messages_are_evicted() {
        let store = MemoryStore::with_max_messages(ChatDefaults::default(), 2);
        store.save_message(&msg("oc_1", Some("m1"), 10, "a")).await.unwrap();
        store.save_message(&msg("oc_1", Some("m2"), 20, "b")).await.unwrap();
        store.save_message(&msg("oc_1", None, 30, "c")).await.unwrap();

        let texts: Vec<String> = store
            .messages_between("oc_1", 0, 100)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["b", "c"]);

        // 被淘汰的 message_id 可以重新写入
        assert!(store.save_message(&msg("oc_1", Some("m1"), 40, "a2")).await.unwrap());
        assert!(!store.save_message(&msg("oc_1", Some("m1"), 50, "a3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_summary_lock_first_caller_wins() {
        for store in stores().await {
            assert!(store.acquire_summary_lock("2024-05-01", "oc_1").await.unwrap());
            assert!(!store.acquire_summary_lock("2024-05-01", "oc_1").await.unwrap());
            assert!(store.acquire_summary_lock("2024-05-02", "oc_1").await.unwrap());
            assert!(store.acquire_summary_lock("2024-05-01", "oc_2").await.unwrap());
        }
    }
}
