use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation emitted by the model. Arguments are always a map once
/// they cross the adapter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: normalize_arguments(arguments),
        }
    }
}

/// Normalize a backend argument bag to a JSON object.
///
/// - JSON-encoded strings are parsed (OpenAI sends arguments this way)
/// - `null` and empty strings become an empty map
/// - any other non-object value is wrapped as `{"value": ...}`
pub fn normalize_arguments(raw: Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Map::new();
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => map,
                Ok(other) => wrap_value(other),
                Err(e) => {
                    warn!(error = %e, raw = %s, "Tool call arguments are not valid JSON, passing as string");
                    wrap_value(Value::String(s))
                }
            }
        }
        other => wrap_value(other),
    }
}

fn wrap_value(v: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("value".to_string(), v);
    map
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    /// Name of the tool that produced the result; Gemini addresses
    /// function responses by name rather than call id.
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Error {
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error { .. })
    }

    /// Text form handed to backends that only accept string tool content.
    pub fn content_text(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { payload } => match payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            ToolOutcome::Error { message } => {
                serde_json::json!({ "error": message }).to_string()
            }
        }
    }

    /// Structured form for backends that accept JSON tool content.
    pub fn content_value(&self) -> Value {
        match &self.outcome {
            ToolOutcome::Success { payload } => match payload {
                Value::Object(_) => payload.clone(),
                other => serde_json::json!({ "result": other }),
            },
            ToolOutcome::Error { message } => serde_json::json!({ "error": message }),
        }
    }
}

/// Where the bytes of an incoming attachment live.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSource {
    Url(String),
    Inline(Vec<u8>),
}

/// A user-supplied attachment before the provider has ingested it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub source: AttachmentSource,
}

impl Attachment {
    pub fn inline(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: AttachmentSource::Inline(data),
        }
    }

    pub fn url(name: impl Into<String>, mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: AttachmentSource::Url(url.into()),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Convert into the canonical reference form, base64-encoding inline data.
    pub fn to_ref(&self) -> AttachmentRef {
        match &self.source {
            AttachmentSource::Url(url) => AttachmentRef {
                name: self.name.clone(),
                mime_type: self.mime_type.clone(),
                url: Some(url.clone()),
                data: None,
            },
            AttachmentSource::Inline(bytes) => AttachmentRef {
                name: self.name.clone(),
                mime_type: self.mime_type.clone(),
                url: None,
                data: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            },
        }
    }
}

/// Canonical attachment part stored in a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64 payload for inline attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl AttachmentRef {
    /// `data:` URI for backends that take inline media as a URL.
    pub fn data_uri(&self) -> Option<String> {
        self.data
            .as_ref()
            .map(|d| format!("data:{};base64,{}", self.mime_type, d))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Attachment(AttachmentRef),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    /// Backend block that must be echoed back verbatim to the same backend,
    /// such as a signed thinking block. Other backends skip it.
    Opaque { provider: String, data: Value },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self { role, parts }
    }

    pub fn system(text: &str) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: &str) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: &str) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self::new(Role::Tool, vec![ContentPart::ToolResult(result)])
    }

    /// Concatenated visible text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult(tr) => Some(tr),
                _ => None,
            })
            .collect()
    }

    pub fn attachments(&self) -> Vec<&AttachmentRef> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Attachment(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn has_attachments(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::Attachment(_)))
    }

    /// Replace every attachment part with an inline "expired" notice.
    /// Returns how many parts were replaced.
    pub fn expire_attachments(&mut self) -> usize {
        let mut replaced = 0;
        for part in self.parts.iter_mut() {
            if let ContentPart::Attachment(a) = part {
                *part = ContentPart::text(format!("[attachment expired: {}]", a.name));
                replaced += 1;
            }
        }
        replaced
    }
}

/// Canonical response from one backend completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Value,
    /// Opaque parts that lead the assistant message, in backend order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<ContentPart>,
}

impl AssistantTurn {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            finish_reason: "stop".to_string(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(text: Option<&str>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: text.map(|t| t.to_string()),
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Visible text, if any non-blank text was produced.
    pub fn visible_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn to_message(&self) -> Message {
        let mut parts = self.reasoning.clone();
        if let Some(text) = self.visible_text() {
            parts.push(ContentPart::text(text));
        }
        parts.extend(self.tool_calls.iter().cloned().map(ContentPart::ToolCall));
        Message::new(Role::Assistant, parts)
    }
}

/// Tool description advertised to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// OpenAI function-calling shape, also accepted by Ollama.
    pub fn to_openai(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Generation parameters for one completion. Adapters apply model quirks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub reasoning_effort: Option<String>,
}

impl ModelParams {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            max_tokens: 4096,
            temperature: None,
            reasoning_effort: None,
        }
    }
}

/// Snapshot of a context's capability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityState {
    pub active: String,
    pub switched_at: Option<chrono::DateTime<chrono::Utc>>,
    pub timeout_seconds: Option<u64>,
}

/// Classifier output for one capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentSignal {
    pub capability: String,
    pub confidence: f32,
    pub selected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_string_arguments() {
        let args = normalize_arguments(json!("{\"symbol\":\"BTC\"}"));
        assert_eq!(args.get("symbol"), Some(&json!("BTC")));
    }

    #[test]
    fn test_normalize_odd_arguments() {
        assert!(normalize_arguments(Value::Null).is_empty());
        assert!(normalize_arguments(json!("  ")).is_empty());
        assert_eq!(normalize_arguments(json!(42)).get("value"), Some(&json!(42)));
        assert_eq!(
            normalize_arguments(json!("not json")).get("value"),
            Some(&json!("not json"))
        );
    }

    #[test]
    fn test_message_serde_shape() {
        let call = ToolCall::new("c1", "crypto_price", json!({"symbol": "BTC"}));
        let msg = AssistantTurn::with_tool_calls(Some("Looking it up"), vec![call]).to_message();
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["parts"][0]["type"], "text");
        assert_eq!(v["parts"][1]["type"], "tool_call");
        assert_eq!(v["parts"][1]["name"], "crypto_price");

        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_expire_attachments() {
        let att = Attachment::inline("cat.png", "image/png", vec![1, 2, 3]);
        let mut msg = Message::new(
            Role::User,
            vec![ContentPart::text("what is this"), ContentPart::Attachment(att.to_ref())],
        );
        assert!(msg.has_attachments());
        assert_eq!(msg.expire_attachments(), 1);
        assert!(!msg.has_attachments());
        assert!(msg.text().contains("[attachment expired: cat.png]"));
    }

    #[test]
    fn test_tool_result_content() {
        let call = ToolCall::new("c1", "crypto_price", json!({}));
        let ok = ToolResult::success(&call, json!(64000.5));
        assert_eq!(ok.content_value(), json!({"result": 64000.5}));
        let err = ToolResult::error(&call, "boom");
        assert!(err.is_error());
        assert_eq!(err.content_text(), "{\"error\":\"boom\"}");
    }

    #[test]
    fn test_attachment_data_uri() {
        let r = Attachment::inline("a.png", "image/png", b"hi".to_vec()).to_ref();
        assert_eq!(r.data_uri().as_deref(), Some("data:image/png;base64,aGk="));
    }
}
