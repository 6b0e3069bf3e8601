//! 助理策略层：在 LlmClient 之上加提示词、模型选择与降级
//!
//! 未配置 OPENAI_API_KEY 或调用失败时不抛错，而是返回降级文本，保证群里总有回复。

use std::sync::Arc;

use crate::config::OpenAiSection;
use crate::extract::truncate_chars;
use crate::llm::{CompletionOptions, LlmClient, Message, OpenAiClient};

/// 降级回复中原话片段的最大字符数
pub const SNIPPET_MAX_CHARS: usize = 600;
/// 摘要输入最大字符数
pub const SUMMARY_INPUT_MAX_CHARS: usize = 120_000;
/// 降级摘要保留的行数与每行字符数
const FALLBACK_SUMMARY_LINES: usize = 10;
const FALLBACK_LINE_CHARS: usize = 120;

const CHAT_TEMPERATURE: f32 = 0.7;
const SUMMARY_TEMPERATURE: f32 = 0.4;
const SUMMARY_MAX_TOKENS: u32 = 900;
const VISION_TEMPERATURE: f32 = 0.2;
const VISION_MAX_TOKENS: u32 = 900;

const CHAT_SYSTEM_PROMPT: &str = "你是企业群聊里的中文 AI 助理。回复要求：\n\
1) 准确、精炼，优先使用条列\n\
2) 被要求翻译或总结时，遵循指定的语言与篇幅\n\
3) 不确定时直接说明，并给出可能的方向";

const SUMMARY_PROMPT_ZH: &str = "你是严谨的中文摘要助手。输出要求：\n\
- 保留关键事实与数字\n\
- 使用条列式，避免冗长\n\
- 原文中的任务、决策、未决事项请分别标注";

const SUMMARY_PROMPT_EN: &str = "You are a precise summarization assistant. Output rules:\n\
- keep key facts and numbers\n\
- use concise bullet points\n\
- label tasks, decisions and open questions separately";

const VISION_SYSTEM_PROMPT: &str = "你是文件与图片理解助手，请用简体中文回复。";
const VISION_USER_PROMPT: &str = "请阅读图片并提取文字与重要信息，最后给出重点摘要。";

pub const NO_VISION_MSG: &str =
    "已收到图片，但系统尚未配置 OPENAI_API_KEY，暂时无法解析图片内容。";

/// 摘要语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lang {
    #[default]
    Zh,
    En,
}

impl Lang {
    /// 从存储中的语言代码解析，未知代码按中文处理
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Lang::En,
            _ => Lang::Zh,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
        }
    }
}

/// 每类任务使用的模型
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub chat: String,
    pub summary: String,
    pub vision: String,
}

impl From<&OpenAiSection> for ModelSet {
    fn from(cfg: &OpenAiSection) -> Self {
        Self {
            chat: cfg.chat_model.clone(),
            summary: cfg.summary_model.clone(),
            vision: cfg.vision_model.clone(),
        }
    }
}

/// 助理：持有可选的 LLM 客户端（None = 降级模式）
#[derive(Clone)]
pub struct Assistant {
    client: Option<Arc<dyn LlmClient>>,
    models: ModelSet,
    max_reply_tokens: u32,
}

impl Assistant {
    pub fn new(client: Option<Arc<dyn LlmClient>>, models: ModelSet, max_reply_tokens: u32) -> Self {
        Self {
            client,
            models,
            max_reply_tokens,
        }
    }

    /// 按配置创建；没有 api_key 时进入降级模式
    pub fn from_config(cfg: &OpenAiSection) -> Self {
        let client = OpenAiClient::from_config(cfg).map(|c| Arc::new(c) as Arc<dyn LlmClient>);
        if client.is_none() {
            tracing::warn!("OPENAI_API_KEY not set, assistant runs in degraded mode");
        }
        Self::new(client, ModelSet::from(cfg), cfg.max_reply_tokens)
    }

    pub fn is_degraded(&self) -> bool {
        self.client.is_none()
    }

    /// 普通聊天回复
    pub async fn reply(&self, text: &str) -> String {
        let Some(client) = &self.client else {
            return format!("(降級回覆) 你說：{}", snippet(text));
        };

        let messages = [Message::system(CHAT_SYSTEM_PROMPT), Message::user(text)];
        let options =
            CompletionOptions::new(&self.models.chat, CHAT_TEMPERATURE, self.max_reply_tokens);
        match client.complete(&messages, &options).await {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                tracing::warn!("LLM returned empty reply");
                format!("(降級回覆) 模型未返回内容，先回覆你的原話片段：{}", snippet(text))
            }
            Err(e) => {
                tracing::error!(error = %e, "chat completion failed");
                format!(
                    "(降級回覆) 目前無法連線到模型，先回覆你的原話片段：{}",
                    snippet(text)
                )
            }
        }
    }

    /// 摘要：输入截断到 [`SUMMARY_INPUT_MAX_CHARS`]
    pub async fn summarize(&self, text: &str, lang: Lang) -> String {
        let Some(client) = &self.client else {
            return fallback_summary(text);
        };

        let system = match lang {
            Lang::Zh => SUMMARY_PROMPT_ZH,
            Lang::En => SUMMARY_PROMPT_EN,
        };
        let messages = [
            Message::system(system),
            Message::user(truncate_chars(text, SUMMARY_INPUT_MAX_CHARS)),
        ];
        let options =
            CompletionOptions::new(&self.models.summary, SUMMARY_TEMPERATURE, SUMMARY_MAX_TOKENS);
        match client.complete(&messages, &options).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => fallback_summary(text),
            Err(e) => {
                tracing::error!(error = %e, "summary completion failed");
                fallback_summary(text)
            }
        }
    }

    /// 图片理解（vision 模型）
    pub async fn describe_image(&self, image: &[u8], mime: &str) -> String {
        let Some(client) = &self.client else {
            return NO_VISION_MSG.to_string();
        };

        let options =
            CompletionOptions::new(&self.models.vision, VISION_TEMPERATURE, VISION_MAX_TOKENS);
        match client
            .describe_image(VISION_SYSTEM_PROMPT, VISION_USER_PROMPT, image, mime, &options)
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => "图片解析没有返回内容。".to_string(),
            Err(e) => {
                tracing::error!(error = %e, "vision completion failed");
                format!("图片解析失败：{}", e)
            }
        }
    }
}

/// 原话片段：去首尾空白，超过 600 字符截断并加 "..."
fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > SNIPPET_MAX_CHARS {
        format!("{}...", truncate_chars(trimmed, SNIPPET_MAX_CHARS))
    } else {
        trimmed.to_string()
    }
}

/// 降级摘要：取前 10 个非空行，每行最多 120 字符
pub fn fallback_summary(text: &str) -> String {
    let bullets: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(FALLBACK_SUMMARY_LINES)
        .map(|l| format!("- {}", truncate_chars(l, FALLBACK_LINE_CHARS)))
        .collect();
    if bullets.is_empty() {
        "(降級摘要) 無可摘要內容".to_string()
    } else {
        format!("(降級摘要)\n{}", bullets.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn models() -> ModelSet {
        ModelSet {
            chat: "chat-m".into(),
            summary: "sum-m".into(),
            vision: "vis-m".into(),
        }
    }

    #[tokio::test]
    async fn test_degraded_reply_truncates() {
        let assistant = Assistant::new(None, models(), 256);
        assert!(assistant.is_degraded());
        let long = "字".repeat(700);
        let reply = assistant.reply(&format!("  {}  ", long)).await;
        assert!(reply.starts_with("(降級回覆) 你說："));
        assert!(reply.ends_with("..."));
        assert_eq!(reply.matches('字').count(), SNIPPET_MAX_CHARS);

        let short = assistant.reply(" hi ").await;
        assert_eq!(short, "(降級回覆) 你說：hi");
    }

    #[tokio::test]
    async fn test_reply_uses_chat_model_and_tokens() {
        let mock = Arc::new(MockLlmClient::new());
        let assistant = Assistant::new(Some(mock.clone() as Arc<dyn LlmClient>), models(), 256);
        let reply = assistant.reply("你好").await;
        assert_eq!(reply, "Echo from Mock: 你好");
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].options.model, "chat-m");
        assert_eq!(calls[0].options.max_tokens, 256);
        assert_eq!(calls[0].messages[0].content, CHAT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_reply_falls_back_on_error() {
        let assistant = Assistant::new(
            Some(Arc::new(MockLlmClient::failing()) as Arc<dyn LlmClient>),
            models(),
            256,
        );
        let reply = assistant.reply("hello").await;
        assert!(reply.contains("目前無法連線到模型"));
        assert!(reply.ends_with("hello"));
    }

    #[tokio::test]
    async fn test_summarize_language_and_truncation() {
        let mock = Arc::new(MockLlmClient::new());
        let assistant = Assistant::new(Some(mock.clone() as Arc<dyn LlmClient>), models(), 256);
        let input = "a".repeat(SUMMARY_INPUT_MAX_CHARS + 10);
        assistant.summarize(&input, Lang::En).await;
        let calls = mock.calls();
        assert_eq!(calls[0].options.model, "sum-m");
        assert_eq!(calls[0].messages[0].content, SUMMARY_PROMPT_EN);
        assert_eq!(calls[0].messages[1].content.len(), SUMMARY_INPUT_MAX_CHARS);
    }

    #[test]
    fn test_fallback_summary() {
        let text = (1..=12).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n\n");
        let out = fallback_summary(&text);
        assert!(out.starts_with("(降級摘要)\n- line 1"));
        assert!(out.contains("- line 10"));
        assert!(!out.contains("line 11"));
        assert_eq!(fallback_summary("  \n "), "(降級摘要) 無可摘要內容");
    }

    #[tokio::test]
    async fn test_describe_image_degraded_and_mocked() {
        let degraded = Assistant::new(None, models(), 256);
        assert_eq!(degraded.describe_image(b"x", "image/jpeg").await, NO_VISION_MSG);

        let mock = Arc::new(MockLlmClient::new());
        let assistant = Assistant::new(Some(mock.clone() as Arc<dyn LlmClient>), models(), 256);
        let out = assistant.describe_image(&[0u8; 4], "image/jpeg").await;
        assert_eq!(out, "Mock vision: 4 bytes of image/jpeg");
        assert_eq!(mock.calls()[0].options.model, "vis-m");
    }

    #[test]
    fn test_lang_from_code() {
        assert_eq!(Lang::from_code("EN"), Lang::En);
        assert_eq!(Lang::from_code("zh"), Lang::Zh);
        assert_eq!(Lang::from_code("fr"), Lang::Zh);
    }
}
