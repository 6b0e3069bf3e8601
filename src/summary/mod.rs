//! 每日群聊摘要：昨日时间窗、单群摘要与定时 Worker

pub mod worker;

use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::parse_tz;
use crate::core::Result;
use crate::lark::LarkApi;
use crate::llm::{Assistant, Lang};
use crate::store::{ChatRecord, MessageStore};

pub use worker::{SummaryWorker, WorkerSettings};

/// 某个本地日期对应的毫秒区间 [start_ms, end_ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub date: NaiveDate,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// 本地日期 00:00 的毫秒时间戳；午夜落在夏令时空档时顺延一小时
fn local_midnight_ms(tz: Tz, date: NaiveDate) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.timestamp_millis(),
        LocalResult::None => tz
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| midnight.and_utc().timestamp_millis()),
    }
}

/// `tz` 下的昨日 00:00 到今日 00:00
pub fn yesterday_range(tz: Tz, now: DateTime<Utc>) -> DayRange {
    let today = now.with_timezone(&tz).date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);
    DayRange {
        date: yesterday,
        start_ms: local_midnight_ms(tz, yesterday),
        end_ms: local_midnight_ms(tz, today),
    }
}

/// 单群摘要的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// 已发送摘要
    Sent,
    /// 昨日无消息，已发送提示
    Empty,
}

/// 单群摘要：读取昨日消息 → 模型摘要 → 发回群里
pub struct ChatSummarizer {
    store: Arc<dyn MessageStore>,
    lark: Arc<dyn LarkApi>,
    assistant: Assistant,
    default_tz: Tz,
}

impl ChatSummarizer {
    pub fn new(
        store: Arc<dyn MessageStore>,
        lark: Arc<dyn LarkApi>,
        assistant: Assistant,
        default_tz: Tz,
    ) -> Self {
        Self {
            store,
            lark,
            assistant,
            default_tz,
        }
    }

    /// 群时区非法时回退到默认时区
    pub fn chat_tz(&self, chat: &ChatRecord) -> Tz {
        parse_tz(&chat.tz).unwrap_or_else(|e| {
            tracing::warn!(chat_id = %chat.chat_id, error = %e, "falling back to default timezone");
            self.default_tz
        })
    }

    pub async fn summarize_chat(
        &self,
        chat: &ChatRecord,
        now: DateTime<Utc>,
    ) -> Result<SummaryOutcome> {
        let tz = self.chat_tz(chat);
        let range = yesterday_range(tz, now);
        let messages = self
            .store
            .messages_between(&chat.chat_id, range.start_ms, range.end_ms)
            .await?;

        let lines: Vec<&str> = messages
            .iter()
            .filter_map(|m| m.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        if lines.is_empty() {
            tracing::info!(chat_id = %chat.chat_id, date = %range.date, "no messages, summary skipped");
            self.lark
                .send_text(
                    &chat.chat_id,
                    &format!("（提示）{} 无聊天记录，略过摘要。", range.date),
                )
                .await?;
            return Ok(SummaryOutcome::Empty);
        }

        let lang = Lang::from_code(&chat.lang);
        let summary = self.assistant.summarize(&lines.join("\n"), lang).await;
        let text = match lang {
            Lang::Zh => format!("【{} 日聊摘】\n{}", range.date, summary),
            Lang::En => format!("[{} chat summary]\n{}", range.date, summary),
        };
        self.lark.send_text(&chat.chat_id, &text).await?;
        tracing::info!(
            chat_id = %chat.chat_id,
            date = %range.date,
            messages = lines.len(),
            "daily summary sent"
        );
        Ok(SummaryOutcome::Sent)
    }
}
