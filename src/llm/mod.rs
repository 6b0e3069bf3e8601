//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）以及带降级的助理

pub mod assistant;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use assistant::{fallback_summary, Assistant, Lang, ModelSet};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{image_data_url, OpenAiClient};
pub use traits::{CompletionOptions, LlmClient};
