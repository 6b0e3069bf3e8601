//! 消息分发：落库 → 按消息类型处理 → 回复到原会话
//!
//! 由 Webhook 在后台任务中调用，所有错误都在这里记录日志，不向上抛出。

pub mod commands;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::{parse_tz, AppConfig};
use crate::core::Result;
use crate::extract::{extract, Extracted};
use crate::lark::{
    is_bot_mentioned, strip_mentions, EventHandler, EventPayload, LarkApi, MessageData,
    ResourceKind,
};
use crate::llm::{Assistant, Lang};
use crate::store::{ChatDefaults, ChatRecord, MessageStore, ScheduleUpdate, StoredMessage};
use crate::summary::{ChatSummarizer, SummaryOutcome};

pub use commands::{parse_command, Command, HELP_TEXT, SUMMARY_USAGE};

pub const MISSING_RESOURCE_MSG: &str = "未取得文件信息";
pub const DOWNLOAD_FAILED_MSG: &str = "文件下载失败，请稍后再试。";
pub const GROUP_ONLY_MSG: &str = "每日摘要仅适用于群聊，请在群里设定。";

/// 分发策略
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub bot_name: String,
    pub bot_open_id: Option<String>,
    pub require_mention: bool,
    /// `/time`、`/date` 使用的时区
    pub tz: Tz,
    pub defaults: ChatDefaults,
}

impl DispatchSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            bot_name: cfg.lark.bot_name.clone(),
            bot_open_id: cfg.lark.bot_open_id.clone().filter(|id| !id.trim().is_empty()),
            require_mention: cfg.lark.require_mention,
            tz: cfg.summary.tz()?,
            defaults: ChatDefaults::from_config(cfg),
        })
    }
}

pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    lark: Arc<dyn LarkApi>,
    assistant: Assistant,
    summarizer: Arc<ChatSummarizer>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        lark: Arc<dyn LarkApi>,
        assistant: Assistant,
        settings: DispatchSettings,
    ) -> Self {
        let summarizer = Arc::new(ChatSummarizer::new(
            Arc::clone(&store),
            Arc::clone(&lark),
            assistant.clone(),
            settings.tz,
        ));
        Self {
            store,
            lark,
            assistant,
            summarizer,
            settings,
        }
    }

    /// 处理一条已通过校验的事件
    pub async fn dispatch(&self, payload: &EventPayload) {
        let Some(msg) = payload.message() else {
            tracing::warn!("no message in event, ignoring");
            return;
        };
        let Some(chat_id) = msg.chat_id.as_deref().filter(|id| !id.is_empty()) else {
            tracing::warn!("no chat_id in message, ignoring");
            return;
        };

        self.persist(payload, msg, chat_id).await;

        let msg_type = msg.message_type();
        match msg_type {
            "text" => self.handle_text(msg, chat_id).await,
            "image" | "file" => self.handle_resource(msg, chat_id).await,
            other => {
                tracing::info!(chat_id, message_type = other, "unsupported message type");
                self.reply(chat_id, &format!("收到类型 {}，尚未支持，将持续扩充。", other))
                    .await;
            }
        }
    }

    /// 落库（best effort）；群聊同时登记到 chats 表
    async fn persist(&self, payload: &EventPayload, msg: &MessageData, chat_id: &str) {
        let msg_type = msg.message_type();
        let ts_ms = match msg.create_time_ms() {
            0 => Utc::now().timestamp_millis(),
            ts => ts,
        };
        let record = StoredMessage {
            chat_id: chat_id.to_string(),
            message_id: msg.message_id.clone(),
            sender_id: payload.sender_open_id().map(String::from),
            ts_ms,
            chat_type: msg.chat_type.clone(),
            msg_type: Some(msg_type.to_string()).filter(|t| !t.is_empty()),
            text: (msg_type == "text").then(|| msg.text()),
            file_key: (msg_type == "file")
                .then(|| msg.resource_key(ResourceKind::File))
                .flatten(),
            image_key: (msg_type == "image")
                .then(|| msg.resource_key(ResourceKind::Image))
                .flatten(),
        };

        if msg.is_group() {
            if let Err(e) = self.store.upsert_chat(chat_id, None).await {
                tracing::error!(chat_id, error = %e, "upsert_chat failed");
            }
        }
        match self.store.save_message(&record).await {
            Ok(true) => tracing::debug!(chat_id, "message saved"),
            Ok(false) => tracing::debug!(chat_id, "message already stored"),
            Err(e) => tracing::error!(chat_id, error = %e, "save_message failed"),
        }
    }

    async fn handle_text(&self, msg: &MessageData, chat_id: &str) {
        let raw = msg.text();
        if raw.is_empty() {
            return;
        }

        if msg.is_group() && self.settings.require_mention {
            let mentioned = is_bot_mentioned(
                msg,
                &self.settings.bot_name,
                self.settings.bot_open_id.as_deref(),
            );
            if !mentioned {
                tracing::info!(chat_id, "group text ignored (no @)");
                return;
            }
        }

        let text = strip_mentions(&raw, &self.settings.bot_name);
        if text.is_empty() {
            // 只 @ 了机器人
            self.reply(chat_id, HELP_TEXT).await;
            return;
        }

        match parse_command(&text) {
            Some(command) => self.run_command(command, chat_id, msg.is_group()).await,
            None => {
                let answer = self.assistant.reply(&text).await;
                self.reply(chat_id, &answer).await;
            }
        }
    }

    async fn run_command(&self, command: Command, chat_id: &str, is_group: bool) {
        tracing::info!(chat_id, ?command, "command");
        if command.changes_subscription() && !is_group {
            self.reply(chat_id, GROUP_ONLY_MSG).await;
            return;
        }
        let now = Utc::now();
        let text = match command {
            Command::Help => Some(HELP_TEXT.to_string()),
            Command::Time => Some(format_time(now, self.settings.tz)),
            Command::Date => Some(format_date(now, self.settings.tz)),
            Command::SummaryNow => {
                self.summarize_now(chat_id, now).await;
                return;
            }
            Command::SummaryOn => self
                .set_enabled(chat_id, true)
                .await
                .map(|_| "已开启本群每日摘要。".to_string()),
            Command::SummaryOff => self
                .set_enabled(chat_id, false)
                .await
                .map(|_| "已关闭本群每日摘要。".to_string()),
            Command::SummaryAt(hour) => self
                .schedule(chat_id, ScheduleUpdate { hour: Some(hour), ..Default::default() })
                .await
                .map(|_| format!("已更新本群每日摘要时间为 {:02}:00。", hour)),
            Command::SummaryTz(tz) => match parse_tz(&tz) {
                Ok(parsed) => self
                    .schedule(
                        chat_id,
                        ScheduleUpdate {
                            tz: Some(parsed.name().to_string()),
                            ..Default::default()
                        },
                    )
                    .await
                    .map(|_| format!("已更新本群摘要时区为 {}。", parsed.name())),
                Err(_) => Some(format!("无效的时区：{}（示例：Asia/Taipei）", tz)),
            },
            Command::SummaryLang(lang) => self
                .schedule(
                    chat_id,
                    ScheduleUpdate {
                        lang: Some(lang.code().to_string()),
                        ..Default::default()
                    },
                )
                .await
                .map(|_| format!("已更新本群摘要语言为 {}。", lang.code())),
            Command::SummaryUsage => Some(SUMMARY_USAGE.to_string()),
        }
        .unwrap_or_else(|| "设定失败，请稍后再试。".to_string());

        self.reply(chat_id, &text).await;
    }

    /// 存储更新失败时记录日志并返回 None
    async fn set_enabled(&self, chat_id: &str, enabled: bool) -> Option<()> {
        match self.store.set_chat_enabled(chat_id, enabled).await {
            Ok(()) => Some(()),
            Err(e) => {
                tracing::error!(chat_id, error = %e, "set_chat_enabled failed");
                None
            }
        }
    }

    async fn schedule(&self, chat_id: &str, update: ScheduleUpdate) -> Option<()> {
        match self.store.set_chat_schedule(chat_id, update).await {
            Ok(()) => Some(()),
            Err(e) => {
                tracing::error!(chat_id, error = %e, "set_chat_schedule failed");
                None
            }
        }
    }

    /// 立即摘要本群昨日消息（使用群的时区与语言设置）
    async fn summarize_now(&self, chat_id: &str, now: DateTime<Utc>) {
        let chat = self.chat_or_default(chat_id).await;
        match self.summarizer.summarize_chat(&chat, now).await {
            Ok(SummaryOutcome::Sent) | Ok(SummaryOutcome::Empty) => {}
            Err(e) => {
                tracing::error!(chat_id, error = %e, "on-demand summary failed");
            }
        }
    }

    async fn chat_or_default(&self, chat_id: &str) -> ChatRecord {
        match self.store.get_chat(chat_id).await {
            Ok(Some(chat)) => chat,
            Ok(None) => self
                .settings
                .defaults
                .new_chat(chat_id, Utc::now().timestamp_millis()),
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "get_chat failed, using defaults");
                self.settings
                    .defaults
                    .new_chat(chat_id, Utc::now().timestamp_millis())
            }
        }
    }

    /// 图片 / 文件：下载 → 解析 → 图片走 vision，文档走摘要
    async fn handle_resource(&self, msg: &MessageData, chat_id: &str) {
        let Some(kind) = ResourceKind::from_message_type(msg.message_type()) else {
            return;
        };
        let key = msg.resource_key(kind);
        let (Some(message_id), Some(key)) = (msg.message_id.as_deref(), key) else {
            tracing::warn!(chat_id, kind = kind.as_str(), "resource message without key");
            self.reply(chat_id, MISSING_RESOURCE_MSG).await;
            return;
        };

        let resource = match self.lark.get_message_resource(message_id, &key, kind).await {
            Ok(res) => res,
            Err(e) => {
                tracing::error!(chat_id, message_id, key = %key, error = %e, "download resource failed");
                self.reply(chat_id, DOWNLOAD_FAILED_MSG).await;
                return;
            }
        };

        let filename = resource.filename.clone().or_else(|| msg.file_name());
        let answer = match extract(resource.data, filename.clone(), resource.content_type).await {
            Extracted::Image { data, mime } => self.assistant.describe_image(&data, &mime).await,
            Extracted::Text(text) if text.trim().is_empty() => {
                "文件中没有可提取的文字。".to_string()
            }
            Extracted::Text(text) => {
                let lang = Lang::from_code(&self.chat_or_default(chat_id).await.lang);
                let summary = self.assistant.summarize(&text, lang).await;
                format!(
                    "【{}】\n{}",
                    filename.as_deref().unwrap_or("未命名"),
                    summary
                )
            }
            Extracted::Unsupported(mime) => {
                tracing::info!(chat_id, mime = %mime, "unsupported attachment");
                format!("暂不支持解析此类型文件（{}）。", mime)
            }
        };
        self.reply(chat_id, &answer).await;
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.lark.send_text(chat_id, text).await {
            tracing::error!(chat_id, error = %e, "send reply failed");
        }
    }
}

#[async_trait]
impl EventHandler for Dispatcher {
    async fn handle(&self, payload: EventPayload) {
        self.dispatch(&payload).await;
    }
}

fn weekday_zh(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "星期一",
        Weekday::Tue => "星期二",
        Weekday::Wed => "星期三",
        Weekday::Thu => "星期四",
        Weekday::Fri => "星期五",
        Weekday::Sat => "星期六",
        Weekday::Sun => "星期日",
    }
}

/// `现在时间：2024-05-01 08:00:00 Asia/Taipei`
pub fn format_time(now: DateTime<Utc>, tz: Tz) -> String {
    let local = now.with_timezone(&tz);
    format!("现在时间：{} {}", local.format("%Y-%m-%d %H:%M:%S"), tz.name())
}

/// `今日日期：2024-05-01（星期三）`
pub fn format_date(now: DateTime<Utc>, tz: Tz) -> String {
    let local = now.with_timezone(&tz);
    format!(
        "今日日期：{}（{}）",
        local.format("%Y-%m-%d"),
        weekday_zh(local.weekday())
    )
}
