//! Skylark - 飞书（Lark）企业助理机器人
//!
//! 模块划分：
//! - **app**: Web / Worker 共用的组件装配
//! - **bot**: 消息分发与文本指令
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **extract**: 附件解析（PDF / XLSX / 文本 / 图片压缩）
//! - **lark**: 飞书事件、Open API 客户端与 Webhook 路由
//! - **llm**: LLM 客户端抽象（OpenAI 兼容 / Mock）与带降级的助理
//! - **observability**: tracing 日志
//! - **store**: 群聊与消息存储（内存 / SQLite）
//! - **summary**: 每日群聊摘要与定时 Worker

pub mod app;
pub mod bot;
pub mod config;
pub mod core;
pub mod extract;
pub mod lark;
pub mod llm;
pub mod observability;
pub mod store;
pub mod summary;

pub use config::{load_config, AppConfig};
pub use core::{BotError, Result};
