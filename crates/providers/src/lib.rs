pub mod anthropic;
pub mod client;
pub mod error;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod text_tools;

use async_trait::async_trait;
use parley_core::types::{AssistantTurn, Attachment, ContentPart, Message, ModelParams, ToolSchema};
use parley_core::Result;

/// One model backend. Each adapter converts the canonical thread to its wire
/// format and back; the agentic loop above it is written once.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Turn a raw attachment into a content part this backend can read.
    /// Returns `Error::UnsupportedAttachment` for types it cannot take.
    async fn ingest_attachment(&self, attachment: &Attachment) -> Result<ContentPart>;

    async fn complete(
        &self,
        thread: &[Message],
        tools: &[ToolSchema],
        params: &ModelParams,
    ) -> Result<AssistantTurn>;
}

/// Strip a `<provider>/` routing prefix from a model name.
/// `openrouter` keeps `anthropic/claude-...` intact because only its own name is removed.
pub fn strip_model_prefix<'a>(model: &'a str, provider: &str) -> &'a str {
    model
        .strip_prefix(provider)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(model)
}

pub use anthropic::AnthropicProvider;
pub use factory::{
    create_provider, create_providers, default_provider_name, infer_provider_from_model,
};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_model_prefix() {
        assert_eq!(strip_model_prefix("anthropic/claude-sonnet-4-5", "anthropic"), "claude-sonnet-4-5");
        assert_eq!(strip_model_prefix("anthropic/claude-sonnet-4-5", "openrouter"), "anthropic/claude-sonnet-4-5");
        assert_eq!(strip_model_prefix("gpt-4o", "openai"), "gpt-4o");
        assert_eq!(strip_model_prefix("ollamax/llama", "ollama"), "ollamax/llama");
    }
}
