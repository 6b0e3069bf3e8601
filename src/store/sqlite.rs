//! SQLite 存储实现
//!
//! rusqlite 同步连接放在 Mutex 里，所有操作通过 spawn_blocking 执行，不阻塞 tokio 工作线程。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::{BotError, Result};
use crate::store::{ChatDefaults, ChatRecord, MessageStore, ScheduleUpdate, StoredMessage};

/// SQLite 存储
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    defaults: ChatDefaults,
}

impl SqliteStore {
    /// 打开数据库文件；不存在时自动创建（含父目录）
    pub fn new<P: AsRef<Path>>(db_path: P, defaults: ChatDefaults) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BotError::Store(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            defaults,
        })
    }

    /// 内存数据库（用于测试）
    pub fn new_in_memory(defaults: ChatDefaults) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            defaults,
        })
    }

    /// 在阻塞线程池中执行数据库操作
    async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| BotError::Store(format!("Failed to acquire database lock: {}", e)))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| BotError::Store(format!("Task failed: {}", e)))?
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 群不存在时按默认设置插入
fn ensure_chat(conn: &Connection, chat_id: &str, defaults: &ChatDefaults) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO chats (chat_id, name, enabled, summary_hour, tz, lang, last_seen)
         VALUES (?1, NULL, 1, ?2, ?3, ?4, ?5)",
        params![chat_id, defaults.summary_hour, defaults.tz, defaults.lang, now_ms()],
    )?;
    Ok(())
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        chat_id: row.get(0)?,
        name: row.get(1)?,
        enabled: row.get::<_, i64>(2)? != 0,
        summary_hour: row.get(3)?,
        tz: row.get(4)?,
        lang: row.get(5)?,
        last_seen_ms: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        chat_id: row.get(0)?,
        message_id: row.get(1)?,
        sender_id: row.get(2)?,
        ts_ms: row.get(3)?,
        chat_type: row.get(4)?,
        msg_type: row.get(5)?,
        text: row.get(6)?,
        file_key: row.get(7)?,
        image_key: row.get(8)?,
    })
}

const CHAT_COLUMNS: &str = "chat_id, name, enabled, summary_hour, tz, lang, last_seen";

#[async_trait]
impl MessageStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chats (
                    chat_id TEXT PRIMARY KEY,
                    name TEXT,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    summary_hour INTEGER NOT NULL DEFAULT 8,
                    tz TEXT NOT NULL,
                    lang TEXT NOT NULL DEFAULT 'zh',
                    last_seen INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    chat_id TEXT NOT NULL,
                    message_id TEXT,
                    sender_id TEXT,
                    ts_ms INTEGER NOT NULL,
                    chat_type TEXT,
                    msg_type TEXT,
                    text TEXT,
                    file_key TEXT,
                    image_key TEXT
                );

                CREATE TABLE IF NOT EXISTS summary_lock (
                    summary_date TEXT NOT NULL,
                    chat_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (summary_date, chat_id)
                );

                CREATE UNIQUE INDEX IF NOT EXISTS ux_messages_message_id ON messages(message_id);
                CREATE INDEX IF NOT EXISTS ix_messages_chat_time ON messages(chat_id, ts_ms);
                CREATE INDEX IF NOT EXISTS ix_chats_enabled ON chats(enabled);
                ",
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_chat(&self, chat_id: &str, name: Option<&str>) -> Result<()> {
        let chat_id = chat_id.to_string();
        let name = name.map(String::from);
        let defaults = self.defaults.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO chats (chat_id, name, enabled, summary_hour, tz, lang, last_seen)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
                 ON CONFLICT(chat_id) DO UPDATE SET
                    name = COALESCE(excluded.name, chats.name),
                    last_seen = excluded.last_seen",
                params![
                    chat_id,
                    name,
                    defaults.summary_hour,
                    defaults.tz,
                    defaults.lang,
                    now_ms()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_chat_enabled(&self, chat_id: &str, enabled: bool) -> Result<()> {
        let chat_id = chat_id.to_string();
        let defaults = self.defaults.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            ensure_chat(&tx, &chat_id, &defaults)?;
            tx.execute(
                "UPDATE chats SET enabled = ?2 WHERE chat_id = ?1",
                params![chat_id, enabled as i64],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_chat_schedule(&self, chat_id: &str, update: ScheduleUpdate) -> Result<()> {
        let chat_id = chat_id.to_string();
        let defaults = self.defaults.clone();
        let hour = update.hour.map(|h| h.min(23));
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            ensure_chat(&tx, &chat_id, &defaults)?;
            tx.execute(
                "UPDATE chats SET
                    summary_hour = COALESCE(?2, summary_hour),
                    tz = COALESCE(?3, tz),
                    lang = COALESCE(?4, lang)
                 WHERE chat_id = ?1",
                params![chat_id, hour, update.tz, update.lang],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        let chat_id = chat_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {} FROM chats WHERE chat_id = ?1", CHAT_COLUMNS);
            let chat = conn
                .query_row(&sql, params![chat_id], chat_from_row)
                .optional()?;
            Ok(chat)
        })
        .await
    }

    async fn enabled_chats(&self) -> Result<Vec<ChatRecord>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {} FROM chats WHERE enabled = 1 ORDER BY chat_id",
                CHAT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let chats = stmt
                .query_map([], chat_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(chats)
        })
        .await
    }

    async fn save_message(&self, message: &StoredMessage) -> Result<bool> {
        let m = message.clone();
        self.execute(move |conn| {
            if m.message_id.is_none() {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM messages
                         WHERE chat_id = ?1 AND ts_ms = ?2 AND text IS ?3 LIMIT 1",
                        params![m.chat_id, m.ts_ms, m.text],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Ok(false);
                }
            }
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO messages
                    (chat_id, message_id, sender_id, ts_ms, chat_type, msg_type, text, file_key, image_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    m.chat_id,
                    m.message_id,
                    m.sender_id,
                    m.ts_ms,
                    m.chat_type,
                    m.msg_type,
                    m.text,
                    m.file_key,
                    m.image_key
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn messages_between(
        &self,
        chat_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredMessage>> {
        let chat_id = chat_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, message_id, sender_id, ts_ms, chat_type, msg_type, text, file_key, image_key
                 FROM messages
                 WHERE chat_id = ?1 AND ts_ms >= ?2 AND ts_ms < ?3
                 ORDER BY ts_ms ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![chat_id, start_ms, end_ms], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn acquire_summary_lock(&self, summary_date: &str, chat_id: &str) -> Result<bool> {
        let summary_date = summary_date.to_string();
        let chat_id = chat_id.to_string();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO summary_lock (summary_date, chat_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![summary_date, chat_id, now_ms()],
            )?;
            Ok(inserted == 1)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        let store = SqliteStore::new_in_memory(ChatDefaults::default()).unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let store = store().await;
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_schedule_update_keeps_other_fields() {
        let store = store().await;
        store.upsert_chat("oc_1", Some("研发群")).await.unwrap();
        store
            .set_chat_schedule(
                "oc_1",
                ScheduleUpdate {
                    hour: Some(30),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .set_chat_schedule(
                "oc_1",
                ScheduleUpdate {
                    lang: Some("en".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let chat = store.get_chat("oc_1").await.unwrap().unwrap();
        assert_eq!(chat.summary_hour, 23);
        assert_eq!(chat.lang, "en");
        assert_eq!(chat.tz, "Asia/Taipei");
        assert_eq!(chat.name.as_deref(), Some("研发群"));

        // 不传 name 不会清空
        store.upsert_chat("oc_1", None).await.unwrap();
        let chat = store.get_chat("oc_1").await.unwrap().unwrap();
        assert_eq!(chat.name.as_deref(), Some("研发群"));
    }

    fn message(id: Option<&str>, ts_ms: i64, text: Option<&str>) -> StoredMessage {
        StoredMessage {
            chat_id: "oc_1".into(),
            message_id: id.map(String::from),
            ts_ms,
            text: text.map(String::from),
            msg_type: Some("text".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_messages_between_bounds_and_order() {
        let store = store().await;
        for (id, ts, text) in [
            ("m5", 2000, "end"),
            ("m3", 1500, "mid-1"),
            ("m1", 999, "before"),
            ("m4", 1500, "mid-2"),
            ("m2", 1000, "start"),
        ] {
            assert!(store.save_message(&message(Some(id), ts, Some(text))).await.unwrap());
        }

        let got = store.messages_between("oc_1", 1000, 2000).await.unwrap();
        let texts: Vec<_> = got.iter().filter_map(|m| m.text.as_deref()).collect();
        assert_eq!(texts, vec!["start", "mid-1", "mid-2"]);
        assert!(store.messages_between("oc_1", 2000, 2000).await.unwrap().is_empty());
        assert!(store.messages_between("oc_2", 0, 5000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_message_without_id() {
        let store = store().await;
        assert!(store.save_message(&message(None, 100, Some("hi"))).await.unwrap());
        assert!(store.save_message(&message(None, 100, Some("hello"))).await.unwrap());
        assert!(!store.save_message(&message(None, 100, Some("hi"))).await.unwrap());

        // text 为 NULL 时同样按 (chat_id, ts_ms) 去重
        assert!(store.save_message(&message(None, 200, None)).await.unwrap());
        assert!(!store.save_message(&message(None, 200, None)).await.unwrap());

        let all = store.messages_between("oc_1", 0, 1000).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|m| m.message_id.is_none()));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bot.db");
        {
            let store = SqliteStore::new(&path, ChatDefaults::default()).unwrap();
            store.init().await.unwrap();
            store.set_chat_enabled("oc_9", false).await.unwrap();
            assert!(store.acquire_summary_lock("2024-05-01", "oc_9").await.unwrap());
        }
        let store = SqliteStore::new(&path, ChatDefaults::default()).unwrap();
        store.init().await.unwrap();
        let chat = store.get_chat("oc_9").await.unwrap().unwrap();
        assert!(!chat.enabled);
        assert!(!store.acquire_summary_lock("2024-05-01", "oc_9").await.unwrap());
    }
}
