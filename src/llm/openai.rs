//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；图片以 data URL 形式内联。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::OpenAiSection;
use crate::core::{BotError, Result};
use crate::llm::{CompletionOptions, LlmClient, Message, Role};

fn llm_err(e: impl std::fmt::Display) -> BotError {
    BotError::Llm(e.to_string())
}

/// OpenAI 兼容客户端：持有 Client 与请求超时
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: &str, timeout: Duration) -> Self {
        let config = match base_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            timeout,
        }
    }

    /// 配置了 api_key 时创建客户端，否则返回 None（降级模式）
    pub fn from_config(cfg: &OpenAiSection) -> Option<Self> {
        if !cfg.is_configured() {
            return None;
        }
        Some(Self::new(
            cfg.base_url.as_deref(),
            cfg.api_key.trim(),
            Duration::from_secs(cfg.timeout_secs.max(1)),
        ))
    }

    fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage> {
        let msg = match m.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(llm_err)?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(llm_err)?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(llm_err)?
                .into(),
        };
        Ok(msg)
    }

    async fn send(&self, request: CreateChatCompletionRequest) -> Result<String> {
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| BotError::Llm(format!("request timed out after {:?}", self.timeout)))?
            .map_err(llm_err)?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "LLM usage"
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }
}

/// 图片字节转 data URL：`data:<mime>;base64,<...>`
pub fn image_data_url(image: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(image))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String> {
        let messages = messages
            .iter()
            .map(Self::to_openai_message)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&options.model)
            .temperature(options.temperature)
            .max_completion_tokens(options.max_tokens)
            .messages(messages)
            .build()
            .map_err(llm_err)?;

        self.send(request).await
    }

    async fn describe_image(
        &self,
        system: &str,
        prompt: &str,
        image: &[u8],
        mime: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(prompt)
            .build()
            .map_err(llm_err)?;
        let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(image_data_url(image, mime))
                    .detail(ImageDetail::Auto)
                    .build()
                    .map_err(llm_err)?,
            )
            .build()
            .map_err(llm_err)?;

        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(vec![
                ChatCompletionRequestUserMessageContentPart::Text(text_part),
                ChatCompletionRequestUserMessageContentPart::ImageUrl(image_part),
            ])
            .build()
            .map_err(llm_err)?;

        let messages = vec![
            Self::to_openai_message(&Message::system(system))?,
            user.into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&options.model)
            .temperature(options.temperature)
            .max_completion_tokens(options.max_tokens)
            .messages(messages)
            .build()
            .map_err(llm_err)?;

        self.send(request).await
    }
}
