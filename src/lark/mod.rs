//! 飞书（Lark）集成：事件结构、@ 判断、Open API 客户端与 Webhook 路由

pub mod client;
pub mod event;
pub mod mention;
pub mod webhook;

pub use client::{LarkApi, LarkClient, Resource};
pub use event::{EventPayload, MessageData, ResourceKind};
pub use mention::{is_bot_mentioned, strip_mentions};
pub use webhook::{create_router, EventHandler, ServiceInfo, WebhookState};
