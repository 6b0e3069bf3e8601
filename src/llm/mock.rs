//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 回显最后一条 User 消息，并记录每次调用的参数，便于断言所用模型与提示词。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::{BotError, Result};
use crate::llm::{CompletionOptions, LlmClient, Message, Role};

/// 一次调用记录
#[derive(Debug, Clone)]
pub struct MockCall {
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
    /// 图片调用时为 (mime, 字节数)
    pub image: Option<(String, usize)>,
}

/// Mock 客户端：回显用户最后一条消息；`failing()` 构造的实例总是返回错误
#[derive(Debug, Default)]
pub struct MockLlmClient {
    fail: bool,
    calls: Mutex<Vec<MockCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String> {
        self.record(MockCall {
            messages: messages.to_vec(),
            options: options.clone(),
            image: None,
        });
        if self.fail {
            return Err(BotError::Llm("mock failure".into()));
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }

    async fn describe_image(
        &self,
        system: &str,
        prompt: &str,
        image: &[u8],
        mime: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        self.record(MockCall {
            messages: vec![Message::system(system), Message::user(prompt)],
            options: options.clone(),
            image: Some((mime.to_string(), image.len())),
        });
        if self.fail {
            return Err(BotError::Llm("mock failure".into()));
        }
        Ok(format!("Mock vision: {} bytes of {}", image.len(), mime))
    }
}
