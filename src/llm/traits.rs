//! LLM 客户端抽象
//!
//! 后端（OpenAI 兼容 / Mock）实现 LlmClient：文本补全与图片理解。

use async_trait::async_trait;

use crate::core::Result;
use crate::llm::Message;

/// 单次请求参数：模型、温度、最大输出 token
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式补全，返回首条回复内容
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String>;

    /// 图片理解：system 提示 + 文本提示 + 一张图片
    async fn describe_image(
        &self,
        system: &str,
        prompt: &str,
        image: &[u8],
        mime: &str,
        options: &CompletionOptions,
    ) -> Result<String>;
}
