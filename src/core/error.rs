//! 机器人错误类型
//!
//! 库内统一返回 `BotError`；二进制入口用 anyhow 包一层上下文。

use thiserror::Error;

/// 运行过程中可能出现的错误（配置、飞书 API、LLM、附件解析、存储等）
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 飞书返回非 2xx 状态
    #[error("Lark API status {status}: {body}")]
    LarkStatus { status: u16, body: String },

    /// 飞书返回 2xx 但 code != 0
    #[error("Lark API error code {code}: {msg}")]
    LarkCode { code: i64, msg: String },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Extract error: {0}")]
    Extract(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid timezone: {0}")]
    Timezone(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for BotError {
    fn from(e: rusqlite::Error) -> Self {
        BotError::Store(e.to_string())
    }
}

impl From<config::ConfigError> for BotError {
    fn from(e: config::ConfigError) -> Self {
        BotError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
