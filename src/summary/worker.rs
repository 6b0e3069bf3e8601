//! 摘要定时 Worker（独立进程运行，避免 Web 多副本重复推送）
//!
//! 两条轨道，共用同一把"当日摘要锁"：
//! - 每小时第 `scan_minute` 分扫描，群本地时间的小时等于其 `summary_hour` 时推送；
//! - 每天默认时区 `fallback_hour:00` 兜底，对所有启用的群再跑一轮。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{BotError, Result};
use crate::store::{ChatDefaults, ChatRecord, MessageStore};
use crate::summary::{ChatSummarizer, SummaryOutcome};

/// 启动时等待存储就绪的重试间隔与上限
const READINESS_RETRY: Duration = Duration::from_secs(2);
const READINESS_MAX_WAIT: Duration = Duration::from_secs(60);

/// Worker 调度参数
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub enabled: bool,
    pub default_tz: Tz,
    pub scan_minute: u32,
    pub fallback_hour: u32,
    /// 存储中没有启用的群时的回退订阅
    pub fallback_chat_ids: Vec<String>,
    pub defaults: ChatDefaults,
}

impl WorkerSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            enabled: cfg.summary.enabled,
            default_tz: cfg.summary.tz()?,
            scan_minute: cfg.summary.scan_minute.min(59),
            fallback_hour: cfg.summary.fallback_hour.min(23),
            fallback_chat_ids: cfg.summary.chat_ids.clone(),
            defaults: ChatDefaults::from_config(cfg),
        })
    }
}

/// 触发来源（日志用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    HourlyScan,
    DailyFallback,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::HourlyScan => "hourly_scan",
            Trigger::DailyFallback => "daily_fallback",
        }
    }
}

/// 单群处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRun {
    Done(SummaryOutcome),
    /// 今日已由其他轨道 / 进程处理
    Locked,
    Failed(String),
}

/// 一轮扫描的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sent: usize,
    pub empty: usize,
    pub locked: usize,
    pub failed: usize,
    /// 小时不匹配而跳过
    pub not_due: usize,
}

impl RunReport {
    fn record(&mut self, run: &ChatRun) {
        match run {
            ChatRun::Done(SummaryOutcome::Sent) => self.sent += 1,
            ChatRun::Done(SummaryOutcome::Empty) => self.empty += 1,
            ChatRun::Locked => self.locked += 1,
            ChatRun::Failed(_) => self.failed += 1,
        }
    }
}

pub struct SummaryWorker {
    summarizer: Arc<ChatSummarizer>,
    store: Arc<dyn MessageStore>,
    settings: WorkerSettings,
    hourly: Schedule,
    daily: Schedule,
}

impl SummaryWorker {
    pub fn new(
        summarizer: Arc<ChatSummarizer>,
        store: Arc<dyn MessageStore>,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let hourly = parse_schedule(&format!("0 {} * * * *", settings.scan_minute))?;
        let daily = parse_schedule(&format!("0 0 {} * * *", settings.fallback_hour))?;
        Ok(Self {
            summarizer,
            store,
            settings,
            hourly,
            daily,
        })
    }

    /// 等待存储就绪：每 2 秒重试 `init()`，最多 60 秒；超时只告警，不中断启动
    pub async fn wait_ready(&self, shutdown: &CancellationToken) {
        let deadline = tokio::time::Instant::now() + READINESS_MAX_WAIT;
        loop {
            match self.store.init().await {
                Ok(()) => {
                    tracing::info!("Store ready");
                    return;
                }
                Err(e) if tokio::time::Instant::now() >= deadline => {
                    tracing::warn!(error = %e, "Store readiness timeout, continuing");
                    return;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Store not ready, retrying");
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(READINESS_RETRY) => {}
            }
        }
    }

    /// 调度主循环，直到收到关闭信号
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            tz = %self.settings.default_tz,
            scan_minute = self.settings.scan_minute,
            fallback_hour = self.settings.fallback_hour,
            enabled = self.settings.enabled,
            "Summary worker starting"
        );
        self.wait_ready(&shutdown).await;

        if !self.settings.enabled {
            tracing::info!("Daily summary disabled, worker idle until shutdown");
            shutdown.cancelled().await;
            return;
        }

        loop {
            let now = Utc::now();
            let Some((at, triggers)) = self.next_fire(now) else {
                tracing::error!("No upcoming schedule, worker stopping");
                return;
            };
            let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(next = %at, ?triggers, "Waiting for next run");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Summary worker stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            for trigger in triggers {
                let report = match trigger {
                    Trigger::HourlyScan => self.run_hourly_scan(Utc::now()).await,
                    Trigger::DailyFallback => self.run_daily_fallback(Utc::now()).await,
                };
                tracing::info!(trigger = trigger.as_str(), ?report, "Summary run finished");
            }
        }
    }

    /// 下一次触发时间及该时刻要执行的轨道（同一时刻先扫描后兜底）
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<Trigger>)> {
        let local_now = now.with_timezone(&self.settings.default_tz);
        let hourly = self.hourly.after(&local_now).next()?.with_timezone(&Utc);
        let daily = self.daily.after(&local_now).next()?.with_timezone(&Utc);
        let fire = if hourly < daily {
            (hourly, vec![Trigger::HourlyScan])
        } else if daily < hourly {
            (daily, vec![Trigger::DailyFallback])
        } else {
            (hourly, vec![Trigger::HourlyScan, Trigger::DailyFallback])
        };
        Some(fire)
    }

    /// 启用的群；存储中没有时回退到配置的 chat_ids（默认时区与小时）
    pub async fn subscribed_chats(&self) -> Vec<ChatRecord> {
        let chats = match self.store.enabled_chats().await {
            Ok(chats) => chats,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load enabled chats");
                Vec::new()
            }
        };
        if !chats.is_empty() {
            return chats;
        }
        let now_ms = Utc::now().timestamp_millis();
        self.settings
            .fallback_chat_ids
            .iter()
            .map(|id| self.settings.defaults.new_chat(id, now_ms))
            .collect()
    }

    /// 每小时扫描：只处理本地小时等于 summary_hour 的群
    pub async fn run_hourly_scan(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();
        let chats = self.subscribed_chats().await;
        if chats.is_empty() {
            tracing::info!("hourly scan: no active chats");
            return report;
        }
        for chat in &chats {
            let tz = self.summarizer.chat_tz(chat);
            if now.with_timezone(&tz).hour() != chat.summary_hour {
                report.not_due += 1;
                continue;
            }
            let run = self.run_with_lock(chat, now, Trigger::HourlyScan).await;
            report.record(&run);
        }
        report
    }

    /// 每日兜底：所有启用的群
    pub async fn run_daily_fallback(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();
        let chats = self.subscribed_chats().await;
        if chats.is_empty() {
            tracing::info!("daily fallback: no active chats");
            return report;
        }
        for chat in &chats {
            let run = self.run_with_lock(chat, now, Trigger::DailyFallback).await;
            report.record(&run);
        }
        report
    }

    /// 以 (群本地今日, chat_id) 加锁后摘要；加锁出错时降级继续
    pub async fn run_with_lock(
        &self,
        chat: &ChatRecord,
        now: DateTime<Utc>,
        trigger: Trigger,
    ) -> ChatRun {
        let tz = self.summarizer.chat_tz(chat);
        let today = now.with_timezone(&tz).date_naive().to_string();

        let acquired = match self.store.acquire_summary_lock(&today, &chat.chat_id).await {
            Ok(got) => got,
            Err(e) => {
                tracing::warn!(chat_id = %chat.chat_id, error = %e, "lock acquire failed, proceeding");
                true
            }
        };
        if !acquired {
            tracing::info!(
                chat_id = %chat.chat_id,
                date = %today,
                reason = trigger.as_str(),
                "already summarized today, skipping"
            );
            return ChatRun::Locked;
        }

        tracing::info!(chat_id = %chat.chat_id, tz = %tz, reason = trigger.as_str(), "summarizing chat");
        match self.summarizer.summarize_chat(chat, now).await {
            Ok(outcome) => ChatRun::Done(outcome),
            Err(e) => {
                tracing::error!(chat_id = %chat.chat_id, error = %e, "summary failed");
                ChatRun::Failed(e.to_string())
            }
        }
    }
}

fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(expr).map_err(|e| BotError::Config(format!("invalid schedule '{}': {}", expr, e)))
}
