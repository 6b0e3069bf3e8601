//! 进程装配：Web 与 Worker 共用的组件创建

use std::sync::Arc;

use crate::bot::{DispatchSettings, Dispatcher};
use crate::config::AppConfig;
use crate::core::Result;
use crate::lark::{LarkApi, LarkClient, ServiceInfo, WebhookState};
use crate::llm::Assistant;
use crate::store::{open_store, ChatDefaults, MessageStore};
use crate::summary::{ChatSummarizer, SummaryWorker, WorkerSettings};

/// 共享组件
pub struct AppComponents {
    pub config: AppConfig,
    pub store: Arc<dyn MessageStore>,
    pub lark: Arc<dyn LarkApi>,
    pub assistant: Assistant,
}

/// 按配置创建存储、飞书客户端与助理（存储尚未建表）
pub fn create_components(config: AppConfig) -> Result<AppComponents> {
    let store = open_store(&config.store.database_url, ChatDefaults::from_config(&config))?;
    let lark: Arc<dyn LarkApi> = Arc::new(LarkClient::new(&config.lark)?);
    let assistant = Assistant::from_config(&config.openai);
    Ok(AppComponents {
        config,
        store,
        lark,
        assistant,
    })
}

impl AppComponents {
    /// Webhook 共享状态（含消息分发器）
    pub fn webhook_state(&self) -> Result<WebhookState> {
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.lark),
            self.assistant.clone(),
            DispatchSettings::from_config(&self.config)?,
        );
        let info = ServiceInfo {
            env: self.config.app.env.clone(),
            tz: self.config.summary.timezone.clone(),
            openai: self.config.openai.is_configured(),
            require_mention: self.config.lark.require_mention,
        };
        Ok(WebhookState::new(
            info,
            Some(self.config.lark.verification_token.clone()),
            Arc::new(dispatcher),
        ))
    }

    pub fn summary_worker(&self) -> Result<SummaryWorker> {
        let settings = WorkerSettings::from_config(&self.config)?;
        let summarizer = Arc::new(ChatSummarizer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.lark),
            self.assistant.clone(),
            settings.default_tz,
        ));
        SummaryWorker::new(summarizer, Arc::clone(&self.store), settings)
    }
}
