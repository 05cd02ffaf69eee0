use serde::{Deserialize, Serialize};

use crate::config::ContextScope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    /// Local file paths or URLs of attached media. Only the first is ingested.
    #[serde(default)]
    pub media: Vec<String>,
    /// When set, the turn runs normally but its thread is not saved.
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp_ms: i64,
}

impl InboundMessage {
    /// Conversation context id for this message under the given scope.
    pub fn context_id(&self, scope: ContextScope) -> String {
        match scope {
            ContextScope::Chat => format!("{}:{}", self.channel, self.chat_id),
            ContextScope::User => format!("{}:{}", self.channel, self.sender_id),
        }
    }

    pub fn cli(content: &str) -> Self {
        Self {
            channel: "cli".to_string(),
            sender_id: "user".to_string(),
            chat_id: "default".to_string(),
            content: content.to_string(),
            media: vec![],
            ephemeral: false,
            metadata: serde_json::Value::Null,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub context_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl OutboundMessage {
    pub fn new(context_id: &str, content: &str) -> Self {
        Self {
            context_id: context_id.to_string(),
            content: content.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Channel prefix of the context id (`cli` for `cli:default`).
    pub fn channel(&self) -> &str {
        self.context_id
            .split_once(':')
            .map(|(channel, _)| channel)
            .unwrap_or(&self.context_id)
    }
}
