//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序（后者覆盖前者）：
//! 1. config/default.toml（找不到则跳过）
//! 2. 调用方显式传入的配置文件
//! 3. 环境变量 `SKYLARK__*`（双下划线表示嵌套，如 `SKYLARK__LARK__BOT_NAME=Sky`）
//! 4. 部署平台常用的扁平变量（`APP_ID`、`OPENAI_API_KEY`、`TIMEZONE` 等，见 [`FLAT_ENV`]）

use std::path::PathBuf;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::core::{BotError, Result};
use crate::store::StoreUrl;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub lark: LarkSection,
    pub openai: OpenAiSection,
    pub store: StoreSection,
    pub summary: SummarySection,
}

/// [app] 段：运行环境、监听地址、日志级别
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub env: String,
    pub host: String,
    pub port: u16,
    /// RUST_LOG 未设置时使用
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            env: "dev".into(),
            host: "0.0.0.0".into(),
            port: 8000,
            log_level: "info".into(),
        }
    }
}

/// [lark] 段：应用凭证与群聊策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LarkSection {
    pub app_id: String,
    pub app_secret: String,
    /// 事件订阅的 Verification Token；为空则不校验
    pub verification_token: String,
    pub bot_name: String,
    /// 机器人自身 open_id，用于更精确的 @ 判断（可选）
    pub bot_open_id: Option<String>,
    /// 国际版 https://open.larksuite.com，中国区 https://open.feishu.cn
    pub base_url: String,
    /// 群聊中是否必须 @ 机器人才回复
    pub require_mention: bool,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for LarkSection {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            verification_token: String::new(),
            bot_name: "Skygpt".into(),
            bot_open_id: None,
            base_url: "https://open.larksuite.com".into(),
            require_mention: false,
            request_timeout_secs: 20,
            download_timeout_secs: 60,
        }
    }
}

/// [openai] 段：OpenAI 兼容后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSection {
    /// 为空时进入降级模式（不调用模型）
    pub api_key: String,
    pub base_url: Option<String>,
    pub chat_model: String,
    pub summary_model: String,
    pub vision_model: String,
    pub max_reply_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for OpenAiSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            chat_model: "gpt-4o-mini".into(),
            summary_model: "gpt-4o-mini".into(),
            vision_model: "gpt-4o-mini".into(),
            max_reply_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

impl OpenAiSection {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// [store] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    /// 空：内存存储；`sqlite://path/to.db`；`sqlite::memory:`
    pub database_url: String,
}

/// [summary] 段：每日群聊摘要
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarySection {
    pub enabled: bool,
    /// 全局默认时区（群未单独设置时使用，也是调度器的时区）
    pub timezone: String,
    /// 新群默认摘要小时
    pub default_hour: u32,
    /// 每小时第几分钟扫描
    pub scan_minute: u32,
    /// 兜底全量摘要的小时（默认时区）
    pub fallback_hour: u32,
    /// 存储中没有启用的群时，回退订阅这些 chat_id
    pub chat_ids: Vec<String>,
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "Asia/Taipei".into(),
            default_hour: 8,
            scan_minute: 0,
            fallback_hour: 8,
            chat_ids: Vec::new(),
        }
    }
}

impl SummarySection {
    /// 解析全局默认时区
    pub fn tz(&self) -> Result<Tz> {
        parse_tz(&self.timezone)
    }
}

/// 解析 IANA 时区名，如 `Asia/Taipei`
pub fn parse_tz(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| BotError::Timezone(format!("{}: {}", name, e)))
}

/// 扁平环境变量 -> 配置键。同一键出现多次时，靠后的变量优先。
pub const FLAT_ENV: &[(&str, &str)] = &[
    ("ENV", "app.env"),
    ("PORT", "app.port"),
    ("LOG_LEVEL", "app.log_level"),
    ("APP_ID", "lark.app_id"),
    ("LARK_APP_ID", "lark.app_id"),
    ("APP_SECRET", "lark.app_secret"),
    ("LARK_APP_SECRET", "lark.app_secret"),
    ("VERIFICATION_TOKEN", "lark.verification_token"),
    ("LARK_VERIFICATION_TOKEN", "lark.verification_token"),
    ("BOT_NAME", "lark.bot_name"),
    ("BOT_OPEN_ID", "lark.bot_open_id"),
    ("LARK_BASE", "lark.base_url"),
    ("LARK_BASE_URL", "lark.base_url"),
    ("REQUIRE_MENTION", "lark.require_mention"),
    ("OPENAI_API_KEY", "openai.api_key"),
    ("OPENAI_BASE_URL", "openai.base_url"),
    ("OPENAI_MODEL", "openai.chat_model"),
    ("OPENAI_CHAT_MODEL", "openai.chat_model"),
    ("OPENAI_SUMMARY_MODEL", "openai.summary_model"),
    ("OPENAI_VISION_MODEL", "openai.vision_model"),
    ("MAX_REPLY_TOKENS", "openai.max_reply_tokens"),
    ("DATABASE_URL", "store.database_url"),
    ("ENABLE_SUMMARY", "summary.enabled"),
    ("TIMEZONE", "summary.timezone"),
    ("SCAN_MINUTE", "summary.scan_minute"),
];

/// 从 config 目录与进程环境变量加载配置
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig> {
    load_config_with(config_path, |key| std::env::var(key).ok())
}

/// 同 [`load_config`]，扁平变量通过 `lookup` 读取（便于测试）
pub fn load_config_with<F>(config_path: Option<PathBuf>, lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            return Err(BotError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SKYLARK")
            .separator("__")
            .try_parsing(true),
    );

    for (var, key) in FLAT_ENV {
        if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
            builder = builder.set_override(*key, value.trim().to_string())?;
        }
    }

    if let Some(ids) = lookup("SUMMARY_CHAT_IDS") {
        let ids: Vec<String> = ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if !ids.is_empty() {
            builder = builder.set_override("summary.chat_ids", ids)?;
        }
    }

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    Ok(cfg)
}

impl AppConfig {
    /// 启动前校验：时区、小时/分钟范围、存储 URL。任何一项失败都应终止启动。
    pub fn validate(&self) -> Result<()> {
        self.summary.tz()?;
        if self.summary.scan_minute > 59 {
            return Err(BotError::Config(format!(
                "summary.scan_minute must be 0..=59, got {}",
                self.summary.scan_minute
            )));
        }
        for (name, hour) in [
            ("summary.default_hour", self.summary.default_hour),
            ("summary.fallback_hour", self.summary.fallback_hour),
        ] {
            if hour > 23 {
                return Err(BotError::Config(format!(
                    "{} must be 0..=23, got {}",
                    name, hour
                )));
            }
        }
        StoreUrl::parse(&self.store.database_url)?;
        if self.lark.app_id.is_empty() || self.lark.app_secret.is_empty() {
            tracing::warn!("lark.app_id / lark.app_secret not set; Lark API calls will fail");
        }
        Ok(())
    }
}
