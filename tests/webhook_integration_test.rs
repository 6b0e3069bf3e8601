//! Webhook 路由集成测试（tower oneshot 驱动 axum Router）

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use skylark::lark::{create_router, EventHandler, EventPayload, ServiceInfo, WebhookState};
use tower::ServiceExt;

use common::{harness, text_event};

#[derive(Default)]
struct CountingHandler {
    count: AtomicUsize,
}

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _payload: EventPayload) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn info() -> ServiceInfo {
    ServiceInfo {
        env: "test".into(),
        tz: "Asia/Taipei".into(),
        openai: false,
        require_mention: true,
    }
}

fn router_with(handler: Arc<dyn EventHandler>, token: Option<&str>) -> Router {
    create_router(Arc::new(WebhookState::new(
        info(),
        token.map(String::from),
        handler,
    )))
}

async fn post(router: &Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(router: &Router, uri: &str) -> Value {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// 后台任务有机会执行
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_health_endpoints() {
    let router = router_with(Arc::new(CountingHandler::default()), None);
    assert_eq!(get(&router, "/healthz").await, json!({"ok": true, "env": "test"}));
    assert_eq!(
        get(&router, "/").await,
        json!({"ok": true, "tz": "Asia/Taipei", "openai": false, "require_mention": true})
    );
}

#[tokio::test]
async fn test_invalid_json_is_acknowledged() {
    let router = router_with(Arc::new(CountingHandler::default()), None);
    let (status, body) = post(&router, "/webhook/lark", "not json{").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 0}));
}

#[tokio::test]
async fn test_challenge_is_echoed_on_both_routes() {
    let router = router_with(Arc::new(CountingHandler::default()), Some("verify-me"));
    let payload = json!({"challenge": "abc123", "token": "whatever", "type": "url_verification"});
    for uri in ["/webhook/lark", "/lark/webhook"] {
        let (_, body) = post(&router, uri, payload.to_string()).await;
        assert_eq!(body, json!({"challenge": "abc123"}));
    }
}

#[tokio::test]
async fn test_encrypted_and_mismatched_token_are_ignored() {
    let handler = Arc::new(CountingHandler::default());
    let router = router_with(handler.clone(), Some("expected"));

    let (_, body) = post(&router, "/webhook/lark", json!({"encrypt": "xxxx"}).to_string()).await;
    assert_eq!(body, json!({"code": 0}));

    let event = text_event("ev_1", "p2p", "hi");
    let (_, body) = post(&router, "/webhook/lark", event.to_string()).await;
    assert_eq!(body, json!({"code": 0}));

    settle().await;
    assert_eq!(handler.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_message_events_are_ignored() {
    let handler = Arc::new(CountingHandler::default());
    let router = router_with(handler.clone(), None);
    let event = json!({
        "schema": "2.0",
        "header": {"event_id": "ev_x", "event_type": "im.chat.member.bot.added_v1"},
        "event": {}
    });
    let (_, body) = post(&router, "/webhook/lark", event.to_string()).await;
    assert_eq!(body, json!({"code": 0}));
    settle().await;
    assert_eq!(handler.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_events_dispatch_once() {
    let handler = Arc::new(CountingHandler::default());
    let router = router_with(handler.clone(), Some("verify-me"));
    let event = text_event("ev_dup", "p2p", "hi").to_string();

    for _ in 0..3 {
        let (_, body) = post(&router, "/webhook/lark", event.clone()).await;
        assert_eq!(body, json!({"code": 0}));
    }
    settle().await;
    assert_eq!(handler.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_object_content_and_null_mentions_are_dispatched() {
    let h = harness(true);
    let router = router_with(h.dispatcher.clone(), Some("verify-me"));

    let mut object_content = text_event("ev_obj", "p2p", "unused");
    object_content["event"]["message"]["content"] = json!({"text": " 对象内容 "});
    let (_, body) = post(&router, "/webhook/lark", object_content.to_string()).await;
    assert_eq!(body, json!({"code": 0}));
    let sent = h.lark.wait_for(1).await;
    assert_eq!(sent[0].1, "(降級回覆) 你說：对象内容");

    let mut null_mentions = text_event("ev_null", "p2p", "还在吗");
    null_mentions["event"]["message"]["mentions"] = Value::Null;
    let (_, body) = post(&router, "/webhook/lark", null_mentions.to_string()).await;
    assert_eq!(body, json!({"code": 0}));
    let sent = h.lark.wait_for(2).await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].1, "(降級回覆) 你說：还在吗");
}

#[tokio::test]
async fn test_p2p_text_gets_degraded_reply() {
    let h = harness(true);
    let router = router_with(h.dispatcher.clone(), Some("verify-me"));

    let event = text_event("ev_p2p", "p2p", "  你好  ");
    let (_, body) = post(&router, "/webhook/lark", event.to_string()).await;
    assert_eq!(body, json!({"code": 0}));

    let sent = h.lark.wait_for(1).await;
    assert_eq!(sent, vec![("oc_chat".to_string(), "(降級回覆) 你說：你好".to_string())]);
}
