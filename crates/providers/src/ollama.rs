use async_trait::async_trait;
use parley_core::types::{
    AssistantTurn, Attachment, AttachmentSource, ContentPart, Message, ModelParams, Role, ToolCall,
    ToolSchema,
};
use parley_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{build_http_client, HttpSettings};
use crate::error::{parse_body, read_body, transport_error};
use crate::text_tools::{extract_tool_calls, tools_prompt};
use crate::{strip_model_prefix, Provider};

const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: Client,
    api_base: String,
}

impl OllamaProvider {
    pub fn new(api_base: Option<&str>) -> Self {
        // Local inference is slow; allow a longer timeout than hosted backends.
        Self::with_settings(api_base, &HttpSettings::with_timeout(Duration::from_secs(300)))
    }

    pub fn with_settings(api_base: Option<&str>, settings: &HttpSettings) -> Self {
        let api_base = api_base
            .unwrap_or(DEFAULT_OLLAMA_BASE)
            .trim_end_matches('/')
            .to_string();
        Self {
            client: build_http_client(settings, &api_base),
            api_base,
        }
    }

    fn options(params: &ModelParams) -> Value {
        let mut options = json!({ "num_predict": params.max_tokens });
        if let Some(t) = params.temperature {
            options["temperature"] = json!(t.max(0.0));
        }
        options
    }

    /// Canonical thread to Ollama chat messages. Images ride in the
    /// `images` field as raw base64; each tool result is its own message.
    fn convert_messages(thread: &[Message]) -> Vec<OllamaMessage> {
        let mut out = Vec::with_capacity(thread.len());
        for msg in thread {
            match msg.role {
                Role::Tool => {
                    for r in msg.tool_results() {
                        out.push(OllamaMessage {
                            role: "tool".to_string(),
                            content: r.content_text(),
                            tool_name: Some(r.name.clone()),
                            ..Default::default()
                        });
                    }
                }
                role => {
                    let images: Vec<String> = msg
                        .attachments()
                        .into_iter()
                        .filter_map(|a| a.data.clone())
                        .collect();
                    let tool_calls: Vec<Value> = msg
                        .tool_calls()
                        .into_iter()
                        .map(|tc| {
                            json!({"function": {"name": tc.name, "arguments": Value::Object(tc.arguments.clone())}})
                        })
                        .collect();
                    out.push(OllamaMessage {
                        role: role.as_str().to_string(),
                        content: msg.text(),
                        images: if images.is_empty() { None } else { Some(images) },
                        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                        tool_name: None,
                    });
                }
            }
        }
        out
    }

    /// Append tool descriptions to the system prompt for models without native tools.
    fn inject_tools_prompt(messages: &mut Vec<OllamaMessage>, tools: &[ToolSchema]) {
        let prompt = tools_prompt(tools);
        let has_system = messages.first().map(|m| m.role == "system").unwrap_or(false);
        if has_system {
            messages[0].content.push_str(&prompt);
        } else {
            messages.insert(
                0,
                OllamaMessage {
                    role: "system".to_string(),
                    content: prompt,
                    ..Default::default()
                },
            );
        }
    }

    async fn send(
        &self,
        model: &str,
        messages: Vec<OllamaMessage>,
        tools: &[ToolSchema],
        params: &ModelParams,
    ) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.api_base);
        let messages_count = messages.len();
        let mut request = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": Self::options(params),
        });
        if !tools.is_empty() {
            request["tools"] = Value::Array(tools.iter().map(|t| t.to_openai()).collect());
        }
        if params.reasoning_effort.is_some() {
            request["think"] = json!(true);
        }

        info!(
            url = %url,
            model = %model,
            tools_count = tools.len(),
            messages_count,
            "Calling Ollama API"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;
        let body = read_body("ollama", response).await?;
        debug!(body_len = body.len(), "Ollama raw response");
        parse_body("ollama", &body)
    }
}

#[derive(Debug, Default, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn into_turn(resp: ChatResponse, tools_offered: bool) -> AssistantTurn {
    let mut tool_calls: Vec<ToolCall> = resp
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, tc)| ToolCall::new(format!("ollama_call_{}", i), tc.function.name, tc.function.arguments))
        .collect();

    let mut text = resp.message.content;
    if tool_calls.is_empty() && tools_offered {
        let (remaining, parsed) = extract_tool_calls(&text, "ollama_call");
        if !parsed.is_empty() {
            text = remaining;
            tool_calls = parsed;
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls"
    } else if resp.done_reason.as_deref() == Some("length") {
        "length"
    } else {
        "stop"
    };

    AssistantTurn {
        text: if text.trim().is_empty() { None } else { Some(text) },
        tool_calls,
        finish_reason: finish_reason.to_string(),
        usage: json!({
            "prompt_tokens": resp.prompt_eval_count,
            "completion_tokens": resp.eval_count,
        }),
        reasoning: Vec::new(),
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn ingest_attachment(&self, attachment: &Attachment) -> Result<ContentPart> {
        if !attachment.is_image() {
            return Err(Error::UnsupportedAttachment(format!(
                "ollama accepts images only, got {}",
                attachment.mime_type
            )));
        }
        if matches!(attachment.source, AttachmentSource::Url(_)) {
            return Err(Error::UnsupportedAttachment(
                "ollama needs inline image data, not a URL".to_string(),
            ));
        }
        Ok(ContentPart::Attachment(attachment.to_ref()))
    }

    async fn complete(
        &self,
        thread: &[Message],
        tools: &[ToolSchema],
        params: &ModelParams,
    ) -> Result<AssistantTurn> {
        let model = strip_model_prefix(&params.model, "ollama");
        let messages = Self::convert_messages(thread);

        match self.send(model, messages, tools, params).await {
            Ok(resp) => Ok(into_turn(resp, !tools.is_empty())),
            Err(Error::Provider(msg)) if !tools.is_empty() && msg.contains("does not support tools") => {
                warn!(model = %model, "Model lacks native tool support, retrying with tools in the prompt");
                let mut messages = Self::convert_messages(thread);
                Self::inject_tools_prompt(&mut messages, tools);
                let resp = self.send(model, messages, &[], params).await?;
                Ok(into_turn(resp, true))
            }
            Err(e) => Err(e),
        }
    }
}
