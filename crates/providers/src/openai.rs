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

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Adapter for OpenAI and OpenAI-compatible chat completion APIs
/// (OpenRouter, DeepSeek, Groq, Kimi, vLLM...).
pub struct OpenAIProvider {
    name: String,
    client: Client,
    api_key: String,
    api_base: String,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, api_base: Option<&str>) -> Self {
        Self::with_settings(
            "openai",
            api_key,
            api_base,
            &HttpSettings::with_timeout(Duration::from_secs(120)),
        )
    }

    pub fn with_settings(
        name: &str,
        api_key: &str,
        api_base: Option<&str>,
        settings: &HttpSettings,
    ) -> Self {
        let api_base = api_base
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        Self {
            name: name.to_string(),
            client: build_http_client(settings, &api_base),
            api_key: api_key.to_string(),
            api_base,
        }
    }

    /// o-series and gpt-5 reasoning models reject `temperature` and `max_tokens`.
    fn is_reasoning_model(model: &str) -> bool {
        ["o1", "o3", "o4", "gpt-5"]
            .iter()
            .any(|prefix| model.starts_with(prefix))
    }

    /// Apply model-specific sampling rules to the request body.
    fn apply_model_params(request: &mut Value, model: &str, params: &ModelParams) {
        if Self::is_reasoning_model(model) {
            request["max_completion_tokens"] = json!(params.max_tokens);
            if let Some(effort) = &params.reasoning_effort {
                request["reasoning_effort"] = json!(effort);
            }
        } else {
            request["max_tokens"] = json!(params.max_tokens);
            if let Some(t) = params.temperature {
                request["temperature"] = json!(t.clamp(0.0, 2.0));
            }
        }
    }

    fn convert_messages(thread: &[Message]) -> Vec<Value> {
        let mut out = Vec::with_capacity(thread.len());
        for msg in thread {
            match msg.role {
                Role::System => out.push(json!({"role": "system", "content": msg.text()})),
                Role::User => {
                    if msg.has_attachments() {
                        let blocks: Vec<Value> = msg
                            .parts
                            .iter()
                            .filter_map(|part| match part {
                                ContentPart::Text { text } => {
                                    Some(json!({"type": "text", "text": text}))
                                }
                                ContentPart::Attachment(a) => a
                                    .url
                                    .clone()
                                    .or_else(|| a.data_uri())
                                    .map(|url| json!({"type": "image_url", "image_url": {"url": url}})),
                                _ => None,
                            })
                            .collect();
                        out.push(json!({"role": "user", "content": blocks}));
                    } else {
                        out.push(json!({"role": "user", "content": msg.text()}));
                    }
                }
                Role::Assistant => {
                    let text = msg.text();
                    let mut entry = json!({
                        "role": "assistant",
                        "content": if text.is_empty() { Value::Null } else { json!(text) },
                    });
                    let calls: Vec<Value> = msg
                        .tool_calls()
                        .into_iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": Value::Object(tc.arguments.clone()).to_string(),
                                }
                            })
                        })
                        .collect();
                    if !calls.is_empty() {
                        entry["tool_calls"] = Value::Array(calls);
                    }
                    out.push(entry);
                }
                Role::Tool => {
                    for result in msg.tool_results() {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": result.call_id,
                            "content": result.content_text(),
                        }));
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ingest_attachment(&self, attachment: &Attachment) -> Result<ContentPart> {
        if !attachment.is_image() {
            return Err(Error::UnsupportedAttachment(format!(
                "{} accepts images only, got {}",
                self.name, attachment.mime_type
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
        let url = format!("{}/chat/completions", self.api_base);
        let model = strip_model_prefix(&params.model, &self.name);

        let mut request = json!({
            "model": model,
            "messages": Self::convert_messages(thread),
        });
        Self::apply_model_params(&mut request, model, params);
        if !tools.is_empty() {
            request["tools"] = Value::Array(tools.iter().map(|t| t.to_openai()).collect());
            request["tool_choice"] = json!("auto");
        }

        info!(
            provider = %self.name,
            url = %url,
            model = %model,
            tools_count = tools.len(),
            messages_count = thread.len(),
            "Calling chat completions API"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e))?;

        let body = read_body(&self.name, response).await?;
        debug!(body_len = body.len(), "Chat completions raw response");
        let resp: ChatResponse = parse_body(&self.name, &body)?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider(format!("{}: no choices in response", self.name)))?;
        let finish_reason = choice.finish_reason.unwrap_or_else(|| "stop".to_string());

        if finish_reason == "content_filter" {
            return Err(Error::ProviderContentBlocked(format!(
                "{} filtered the response",
                self.name
            )));
        }
        if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
            return Err(Error::ProviderContentBlocked(refusal));
        }

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        Ok(AssistantTurn {
            text: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason,
            usage: resp.usage.unwrap_or(Value::Null),
            reasoning: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::ToolResult;

    #[test]
    fn test_reasoning_model_params() {
        let mut params = ModelParams::new("o3-mini");
        params.temperature = Some(0.3);
        params.reasoning_effort = Some("low".to_string());
        let mut req = json!({});
        OpenAIProvider::apply_model_params(&mut req, "o3-mini", &params);
        assert!(req.get("temperature").is_none());
        assert!(req.get("max_tokens").is_none());
        assert_eq!(req["max_completion_tokens"], 4096);
        assert_eq!(req["reasoning_effort"], "low");

        let mut req = json!({});
        OpenAIProvider::apply_model_params(&mut req, "gpt-4o", &params);
        assert_eq!(req["max_tokens"], 4096);
        assert!((req["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert!(req.get("reasoning_effort").is_none());
    }

    #[test]
    fn test_convert_tool_round() {
        let call = ToolCall::new("call_1", "crypto_price", json!({"symbol": "bitcoin"}));
        let thread = vec![
            Message::system("be brief"),
            Message::user("price of btc?"),
            AssistantTurn::with_tool_calls(None, vec![call.clone()]).to_message(),
            Message::tool_result(ToolResult::success(&call, json!({"usd": 64000}))),
        ];
        let wire = OpenAIProvider::convert_messages(&thread);
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[2]["content"], Value::Null);
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], "{\"symbol\":\"bitcoin\"}");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_convert_image_attachment() {
        let att = Attachment::inline("a.png", "image/png", b"hi".to_vec());
        let msg = Message::new(
            Role::User,
            vec![ContentPart::text("what is it"), ContentPart::Attachment(att.to_ref())],
        );
        let wire = OpenAIProvider::convert_messages(&[msg]);
        assert_eq!(wire[0]["content"][1]["image_url"]["url"], "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn test_rejects_non_image() {
        let provider = OpenAIProvider::new("sk-test", None);
        let pdf = Attachment::inline("doc.pdf", "application/pdf", vec![0]);
        assert!(matches!(
            provider.ingest_attachment(&pdf).await,
            Err(Error::UnsupportedAttachment(_))
        ));
    }
}
