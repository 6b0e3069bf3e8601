//! 飞书事件订阅 Webhook
//!
//! 重要：飞书要求 Webhook 在 **3 秒内** 返回 200，否则判失败并重试。
//! 这里只做校验与去重，消息处理交给后台任务。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::lark::event::EventPayload;

/// 已处理事件 ID 的上限，超过后整体清空
pub const MAX_PROCESSED_EVENTS: usize = 10_000;

/// 被接受的消息事件的处理者（后台执行）
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: EventPayload);
}

/// 健康页展示的运行信息
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub env: String,
    pub tz: String,
    /// 是否配置了 OPENAI_API_KEY
    pub openai: bool,
    pub require_mention: bool,
}

/// Webhook 共享状态
pub struct WebhookState {
    pub info: ServiceInfo,
    /// 为空则不校验
    pub verification_token: Option<String>,
    pub handler: Arc<dyn EventHandler>,
    processed_events: RwLock<HashSet<String>>,
}

impl WebhookState {
    pub fn new(
        info: ServiceInfo,
        verification_token: Option<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            info,
            verification_token: verification_token.filter(|t| !t.trim().is_empty()),
            handler,
            processed_events: RwLock::new(HashSet::new()),
        }
    }

    /// 记录事件 ID，已见过则返回 true
    async fn is_duplicate(&self, event_id: &str) -> bool {
        let mut processed = self.processed_events.write().await;
        if processed.contains(event_id) {
            return true;
        }
        processed.insert(event_id.to_string());
        if processed.len() > MAX_PROCESSED_EVENTS {
            processed.clear();
        }
        false
    }
}

/// 创建 HTTP 路由（Webhook + 健康检查）
pub fn create_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/webhook/lark", post(webhook_handler))
        .route("/lark/webhook", post(webhook_handler))
        .with_state(state)
}

async fn root(State(state): State<Arc<WebhookState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "tz": state.info.tz,
        "openai": state.info.openai,
        "require_mention": state.info.require_mention,
    }))
}

async fn healthz(State(state): State<Arc<WebhookState>>) -> Json<Value> {
    Json(json!({ "ok": true, "env": state.info.env }))
}

fn ack() -> Json<Value> {
    Json(json!({ "code": 0 }))
}

/// POST /webhook/lark - URL 校验与消息回调
async fn webhook_handler(State(state): State<Arc<WebhookState>>, body: Bytes) -> Json<Value> {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Lark webhook: invalid json body");
            return ack();
        }
    };

    if let Some(challenge) = raw.get("challenge") {
        tracing::info!("Lark challenge received");
        return Json(json!({ "challenge": challenge }));
    }

    if raw.get("encrypt").is_some() {
        tracing::warn!(
            "Lark webhook: payload is encrypted (Encrypt Key enabled), decryption is not supported; \
             remove the Encrypt Key in the Lark console"
        );
        return ack();
    }

    let payload: EventPayload = match serde_json::from_value(raw) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "Lark webhook: unexpected payload shape");
            return ack();
        }
    };

    if let Some(expected) = state.verification_token.as_deref() {
        if payload.verification_token() != Some(expected) {
            tracing::warn!("Lark webhook: verification token mismatch, ignoring");
            return ack();
        }
    }

    let event_type = payload.event_type().unwrap_or("(none)").to_string();
    if !payload.is_message_event() {
        tracing::info!(event_type = %event_type, "Lark webhook: not a message event, ignoring");
        return ack();
    }

    if let Some(event_id) = payload.event_id() {
        if state.is_duplicate(event_id).await {
            tracing::debug!(event_id, "Duplicate event ignored");
            return ack();
        }
    }

    tracing::info!(
        event_type = %event_type,
        event_id = payload.event_id().unwrap_or("-"),
        chat_id = payload.message().and_then(|m| m.chat_id.as_deref()).unwrap_or("-"),
        "Lark webhook: accepted message, spawning background task"
    );

    let handler = Arc::clone(&state.handler);
    tokio::spawn(async move {
        handler.handle(payload).await;
    });

    ack()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _payload: EventPayload) {}
    }

    #[tokio::test]
    async fn test_dedupe_set_is_bounded() {
        let state = WebhookState::new(
            ServiceInfo {
                env: "test".into(),
                tz: "UTC".into(),
                openai: false,
                require_mention: false,
            },
            Some("  ".into()),
            Arc::new(NoopHandler),
        );
        assert!(state.verification_token.is_none());
        assert!(!state.is_duplicate("ev_1").await);
        assert!(state.is_duplicate("ev_1").await);

        for i in 0..MAX_PROCESSED_EVENTS {
            state.is_duplicate(&format!("bulk_{}", i)).await;
        }
        // 超过上限后清空，旧 ID 不再视为重复
        assert!(!state.is_duplicate("ev_1").await);
    }
}
