//! 存储层：群聊配置、消息记录与每日摘要锁
//!
//! 定义统一的 MessageStore 接口，支持内存与 SQLite 两种实现。
//! DATABASE_URL 为空时使用内存存储（重启即丢失，仅适合开发）。

pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::core::{BotError, Result};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// 群聊（订阅摘要的单位）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: String,
    pub name: Option<String>,
    /// 是否开启每日摘要
    pub enabled: bool,
    /// 每日摘要的小时（群时区，0..=23）
    pub summary_hour: u32,
    pub tz: String,
    /// zh / en
    pub lang: String,
    /// 最近一次收到消息的时间（毫秒）
    pub last_seen_ms: i64,
}

/// 一条消息记录
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredMessage {
    pub chat_id: String,
    pub message_id: Option<String>,
    pub sender_id: Option<String>,
    pub ts_ms: i64,
    /// p2p / group
    pub chat_type: Option<String>,
    /// text / image / file ...
    pub msg_type: Option<String>,
    pub text: Option<String>,
    pub file_key: Option<String>,
    pub image_key: Option<String>,
}

/// 群聊摘要设置的部分更新；None 表示不修改
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub hour: Option<u32>,
    pub tz: Option<String>,
    pub lang: Option<String>,
}

/// 新群的默认设置
#[derive(Debug, Clone)]
pub struct ChatDefaults {
    pub summary_hour: u32,
    pub tz: String,
    pub lang: String,
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            summary_hour: 8,
            tz: "Asia/Taipei".into(),
            lang: "zh".into(),
        }
    }
}

impl ChatDefaults {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            summary_hour: cfg.summary.default_hour.min(23),
            tz: cfg.summary.timezone.clone(),
            lang: "zh".into(),
        }
    }

    /// 以默认设置构造一条新群记录
    pub fn new_chat(&self, chat_id: &str, now_ms: i64) -> ChatRecord {
        ChatRecord {
            chat_id: chat_id.to_string(),
            name: None,
            enabled: true,
            summary_hour: self.summary_hour,
            tz: self.tz.clone(),
            lang: self.lang.clone(),
            last_seen_ms: now_ms,
        }
    }
}

/// 存储接口
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 建表（幂等）
    async fn init(&self) -> Result<()>;

    /// 确保群存在并刷新 last_seen；不改变 enabled 与摘要设置
    async fn upsert_chat(&self, chat_id: &str, name: Option<&str>) -> Result<()>;

    async fn set_chat_enabled(&self, chat_id: &str, enabled: bool) -> Result<()>;

    /// 更新摘要小时（夹到 0..=23）/ 时区 / 语言，群不存在时先创建
    async fn set_chat_schedule(&self, chat_id: &str, update: ScheduleUpdate) -> Result<()>;

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>>;

    /// 所有开启摘要的群
    async fn enabled_chats(&self) -> Result<Vec<ChatRecord>>;

    /// 保存消息，返回是否新插入（按 message_id 去重；无 id 时按 chat_id+ts_ms+text）
    async fn save_message(&self, message: &StoredMessage) -> Result<bool>;

    /// [start_ms, end_ms) 内的消息，按时间升序
    async fn messages_between(
        &self,
        chat_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredMessage>>;

    /// 当日摘要锁：仅第一个调用者返回 true
    async fn acquire_summary_lock(&self, summary_date: &str, chat_id: &str) -> Result<bool>;
}

/// DATABASE_URL 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    /// 进程内 HashMap
    Memory,
    SqliteMemory,
    SqliteFile(PathBuf),
}

impl StoreUrl {
    /// 支持：空、`sqlite::memory:`、`:memory:`、`sqlite://path`、`sqlite:path`、`*.db` 路径。
    /// 其他（包括 postgres://）视为配置错误，启动时失败。
    pub fn parse(raw: &str) -> Result<Self> {
        let url = raw.trim();
        if url.is_empty() {
            return Ok(StoreUrl::Memory);
        }
        if matches!(url, ":memory:" | "sqlite::memory:" | "sqlite://:memory:") {
            return Ok(StoreUrl::SqliteMemory);
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"));
        if let Some(path) = path {
            let path = path.split('?').next().unwrap_or("").trim();
            if path.is_empty() {
                return Err(BotError::Config(format!("DATABASE_URL has no path: {}", raw)));
            }
            return Ok(StoreUrl::SqliteFile(PathBuf::from(path)));
        }
        let lower = url.to_ascii_lowercase();
        if !url.contains("://")
            && [".db", ".sqlite", ".sqlite3"]
                .iter()
                .any(|ext| lower.ends_with(ext))
        {
            return Ok(StoreUrl::SqliteFile(PathBuf::from(url)));
        }
        let scheme = url.split("://").next().unwrap_or(url);
        Err(BotError::Config(format!(
            "unsupported DATABASE_URL scheme '{}' (expected sqlite://<path> or empty)",
            scheme
        )))
    }
}

/// 按 DATABASE_URL 打开存储（未建表，调用方需 `init()`）
pub fn open_store(database_url: &str, defaults: ChatDefaults) -> Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match StoreUrl::parse(database_url)? {
        StoreUrl::Memory => {
            tracing::warn!("DATABASE_URL is empty, using in-memory store (data lost on restart)");
            Arc::new(MemoryStore::new(defaults))
        }
        StoreUrl::SqliteMemory => Arc::new(SqliteStore::new_in_memory(defaults)?),
        StoreUrl::SqliteFile(path) => {
            tracing::info!(path = %path.display(), "opening SQLite store");
            Arc::new(SqliteStore::new(path, defaults)?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_url_parse() {
        assert_eq!(StoreUrl::parse("").unwrap(), StoreUrl::Memory);
        assert_eq!(StoreUrl::parse("  ").unwrap(), StoreUrl::Memory);
        assert_eq!(StoreUrl::parse("sqlite::memory:").unwrap(), StoreUrl::SqliteMemory);
        assert_eq!(
            StoreUrl::parse("sqlite://data/bot.db?mode=rwc").unwrap(),
            StoreUrl::SqliteFile(PathBuf::from("data/bot.db"))
        );
        assert_eq!(
            StoreUrl::parse("sqlite:/var/lib/bot.db").unwrap(),
            StoreUrl::SqliteFile(PathBuf::from("/var/lib/bot.db"))
        );
        assert_eq!(
            StoreUrl::parse("./bot.sqlite3").unwrap(),
            StoreUrl::SqliteFile(PathBuf::from("./bot.sqlite3"))
        );
    }

    #[test]
    fn test_store_url_rejects_unknown() {
        assert!(matches!(StoreUrl::parse("postgres://u:p@h/db"), Err(BotError::Config(_))));
        assert!(matches!(StoreUrl::parse("sqlite://"), Err(BotError::Config(_))));
        assert!(StoreUrl::parse("not a url").is_err());
    }
}
