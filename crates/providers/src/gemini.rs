use async_trait::async_trait;
use parley_core::types::{
    AssistantTurn, Attachment, ContentPart, Message, ModelParams, Role, ToolCall, ToolSchema,
};
use parley_core::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{build_http_client, HttpSettings};
use crate::error::{parse_body, read_body, transport_error};
use crate::{strip_model_prefix, Provider};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// MIME families Gemini accepts as inline or file data.
const ACCEPTED_MIME_PREFIXES: &[&str] = &["image/", "audio/", "video/", "application/pdf", "text/plain"];

/// Finish reasons that mean the candidate was withheld.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII", "RECITATION"];

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    api_base: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, api_base: Option<&str>) -> Self {
        Self::with_settings(
            api_key,
            api_base,
            &HttpSettings::with_timeout(Duration::from_secs(120)),
        )
    }

    pub fn with_settings(api_key: &str, api_base: Option<&str>, settings: &HttpSettings) -> Self {
        let api_base = api_base
            .unwrap_or(GEMINI_API_BASE)
            .trim_end_matches('/')
            .to_string();
        Self {
            client: build_http_client(settings, &api_base),
            api_key: api_key.to_string(),
            api_base,
        }
    }

    fn generation_config(model: &str, params: &ModelParams) -> Value {
        let mut config = json!({ "maxOutputTokens": params.max_tokens });
        if let Some(t) = params.temperature {
            config["temperature"] = json!(t.clamp(0.0, 2.0));
        }
        // Only 2.5-generation models take a thinking budget.
        if model.contains("2.5") {
            let budget = match params.reasoning_effort.as_deref() {
                Some("low") => Some(1024),
                Some("medium") => Some(8192),
                Some("high") => Some(24576),
                _ => None,
            };
            if let Some(budget) = budget {
                config["thinkingConfig"] = json!({ "thinkingBudget": budget });
            }
        }
        config
    }

    /// Canonical thread to Gemini `contents`. Assistant turns use role
    /// `model`; function responses are user parts addressed by tool name.
    fn convert_messages(thread: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in thread {
            let (role, parts): (&str, Vec<Value>) = match msg.role {
                Role::System => {
                    system.push(msg.text());
                    continue;
                }
                Role::User => (
                    "user",
                    msg.parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => Some(json!({"text": text})),
                            ContentPart::Attachment(a) => match (&a.data, &a.url) {
                                (Some(data), _) => Some(json!({
                                    "inlineData": {"mimeType": a.mime_type, "data": data}
                                })),
                                (None, Some(uri)) => Some(json!({
                                    "fileData": {"mimeType": a.mime_type, "fileUri": uri}
                                })),
                                _ => None,
                            },
                            _ => None,
                        })
                        .collect(),
                ),
                Role::Assistant => (
                    "model",
                    msg.parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } if !text.is_empty() => Some(json!({"text": text})),
                            ContentPart::ToolCall(tc) => Some(json!({
                                "functionCall": {"name": tc.name, "args": Value::Object(tc.arguments.clone())}
                            })),
                            _ => None,
                        })
                        .collect(),
                ),
                Role::Tool => (
                    "user",
                    msg.tool_results()
                        .into_iter()
                        .map(|r| {
                            json!({
                                "functionResponse": {"name": r.name, "response": r.content_value()}
                            })
                        })
                        .collect(),
                ),
            };
            if parts.is_empty() {
                continue;
            }

            let same_role = contents.last().map(|last| last["role"] == role).unwrap_or(false);
            if same_role {
                if let Some(existing) = contents.last_mut().and_then(|l| l["parts"].as_array_mut()) {
                    existing.extend(parts);
                }
            } else {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }

        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, contents)
    }

    fn convert_tools(tools: &[ToolSchema]) -> Value {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        json!([{ "functionDeclarations": declarations }])
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    args: Option<Value>,
}

fn into_turn(resp: GenerateResponse) -> Result<AssistantTurn> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(Error::ProviderContentBlocked(format!(
            "gemini blocked the prompt: {}",
            reason
        )));
    }
    let candidate = resp
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| Error::Provider("gemini: no candidates in response".to_string()))?;

    let finish = candidate.finish_reason.unwrap_or_else(|| "STOP".to_string());
    if BLOCKED_FINISH_REASONS.contains(&finish.as_str()) {
        return Err(Error::ProviderContentBlocked(format!(
            "gemini withheld the response: {}",
            finish
        )));
    }

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(text) = part.text.filter(|t| !t.is_empty() && !part.thought) {
            texts.push(text);
        }
        if let Some(fc) = part.function_call {
            // Gemini has no call ids; results are matched by name.
            let id = format!("gemini_{}", uuid::Uuid::new_v4().simple());
            tool_calls.push(ToolCall::new(id, fc.name, fc.args.unwrap_or(Value::Null)));
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls".to_string()
    } else if finish == "MAX_TOKENS" {
        "length".to_string()
    } else {
        "stop".to_string()
    };

    Ok(AssistantTurn {
        text: if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        },
        tool_calls,
        finish_reason,
        usage: resp.usage_metadata.unwrap_or(Value::Null),
        reasoning: Vec::new(),
    })
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn ingest_attachment(&self, attachment: &Attachment) -> Result<ContentPart> {
        let accepted = ACCEPTED_MIME_PREFIXES
            .iter()
            .any(|prefix| attachment.mime_type.starts_with(prefix));
        if !accepted {
            return Err(Error::UnsupportedAttachment(format!(
                "gemini does not accept {}",
                attachment.mime_type
            )));
        }
        Ok(ContentPart::Attachment(attachment.to_ref()))
    }

    async fn complete(
        &self,
        thread: &[Message],
        tools: &[ToolSchema],
        params: &ModelParams,
    ) -> Result<AssistantTurn> {
        let model = strip_model_prefix(&params.model, "gemini");
        let url = format!("{}/models/{}:generateContent", self.api_base, model);
        let (system, contents) = Self::convert_messages(thread);

        let mut request = json!({
            "contents": contents,
            "generationConfig": Self::generation_config(model, params),
        });
        if let Some(system) = system {
            request["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            request["tools"] = Self::convert_tools(tools);
        }

        info!(
            model = %model,
            tools_count = tools.len(),
            messages_count = thread.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("gemini", e))?;

        let body = read_body("gemini", response).await?;
        debug!(body_len = body.len(), "Gemini raw response");
        into_turn(parse_body("gemini", &body)?)
    }
}
