use async_trait::async_trait;
use parley_core::types::{
    AssistantTurn, Attachment, AttachmentRef, ContentPart, Message, ModelParams, Role, ToolCall,
    ToolSchema,
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

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, api_base: Option<&str>) -> Self {
        Self::with_settings(
            api_key,
            api_base,
            &HttpSettings::with_timeout(Duration::from_secs(120)),
        )
    }

    pub fn with_settings(api_key: &str, api_base: Option<&str>, settings: &HttpSettings) -> Self {
        let api_base = api_base
            .unwrap_or(ANTHROPIC_API_BASE)
            .trim_end_matches('/')
            .to_string();
        Self {
            client: build_http_client(settings, &api_base),
            api_key: api_key.to_string(),
            api_base,
        }
    }

    /// Thinking budget for a reasoning effort level. Must stay below `max_tokens`.
    fn thinking_budget(effort: &str) -> Option<u32> {
        match effort {
            "low" => Some(1024),
            "medium" => Some(4096),
            "high" => Some(16384),
            _ => None,
        }
    }

    /// Anthropic accepts temperature in [0, 1]; extended thinking requires it unset.
    fn apply_model_params(request: &mut Value, params: &ModelParams) {
        request["max_tokens"] = json!(params.max_tokens);
        let budget = params
            .reasoning_effort
            .as_deref()
            .and_then(Self::thinking_budget)
            .filter(|b| *b < params.max_tokens);
        if let Some(budget) = budget {
            request["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        } else if let Some(t) = params.temperature {
            request["temperature"] = json!(t.clamp(0.0, 1.0));
        }
    }

    fn attachment_block(a: &AttachmentRef) -> Option<Value> {
        let kind = if a.mime_type == "application/pdf" {
            "document"
        } else {
            "image"
        };
        if let Some(data) = &a.data {
            Some(json!({
                "type": kind,
                "source": {"type": "base64", "media_type": a.mime_type, "data": data}
            }))
        } else {
            a.url
                .as_ref()
                .map(|url| json!({"type": kind, "source": {"type": "url", "url": url}}))
        }
    }

    /// Canonical thread to Anthropic messages. System text becomes the
    /// top-level `system` field; tool results travel as user `tool_result`
    /// blocks; consecutive same-role messages are merged.
    fn convert_messages(thread: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system: Vec<String> = Vec::new();
        let mut out: Vec<Value> = Vec::new();

        for msg in thread {
            let (role, blocks): (&str, Vec<Value>) = match msg.role {
                Role::System => {
                    system.push(msg.text());
                    continue;
                }
                Role::User => (
                    "user",
                    msg.parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                            ContentPart::Attachment(a) => Self::attachment_block(a),
                            _ => None,
                        })
                        .collect(),
                ),
                Role::Assistant => (
                    "assistant",
                    msg.parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } if !text.is_empty() => {
                                Some(json!({"type": "text", "text": text}))
                            }
                            ContentPart::ToolCall(tc) => Some(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": Value::Object(tc.arguments.clone()),
                            })),
                            // Thinking blocks go back unchanged, signature included.
                            ContentPart::Opaque { provider, data } if provider == "anthropic" => {
                                Some(data.clone())
                            }
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
                                "type": "tool_result",
                                "tool_use_id": r.call_id,
                                "content": r.content_text(),
                                "is_error": r.is_error(),
                            })
                        })
                        .collect(),
                ),
            };
            if blocks.is_empty() {
                continue;
            }

            let same_role = out.last().map(|last| last["role"] == role).unwrap_or(false);
            if same_role {
                if let Some(existing) = out.last_mut().and_then(|l| l["content"].as_array_mut()) {
                    existing.extend(blocks);
                }
            } else {
                out.push(json!({"role": role, "content": blocks}));
            }
        }

        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, out)
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    #[serde(other)]
    Other,
}

fn into_turn(resp: MessagesResponse) -> Result<AssistantTurn> {
    let stop_reason = resp.stop_reason.unwrap_or_else(|| "end_turn".to_string());
    if stop_reason == "refusal" {
        return Err(Error::ProviderContentBlocked(
            "anthropic declined to respond".to_string(),
        ));
    }

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut reasoning = Vec::new();
    for block in resp.content {
        match block {
            ContentBlock::Text { text } if !text.is_empty() => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input))
            }
            ContentBlock::Thinking { thinking, signature } => reasoning.push(ContentPart::Opaque {
                provider: "anthropic".to_string(),
                data: json!({"type": "thinking", "thinking": thinking, "signature": signature}),
            }),
            ContentBlock::RedactedThinking { data } => reasoning.push(ContentPart::Opaque {
                provider: "anthropic".to_string(),
                data: json!({"type": "redacted_thinking", "data": data}),
            }),
            _ => {}
        }
    }

    let finish_reason = match stop_reason.as_str() {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    };

    Ok(AssistantTurn {
        text: if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        },
        tool_calls,
        finish_reason: finish_reason.to_string(),
        usage: resp.usage.unwrap_or(Value::Null),
        reasoning,
    })
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn ingest_attachment(&self, attachment: &Attachment) -> Result<ContentPart> {
        let accepted = attachment.is_image() || attachment.mime_type == "application/pdf";
        if !accepted {
            return Err(Error::UnsupportedAttachment(format!(
                "anthropic accepts images and PDF documents, got {}",
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
        let url = format!("{}/messages", self.api_base);
        let model = strip_model_prefix(&params.model, "anthropic");
        let (system, messages) = Self::convert_messages(thread);

        let mut request = json!({
            "model": model,
            "messages": messages,
        });
        Self::apply_model_params(&mut request, params);
        if let Some(system) = system {
            request["system"] = json!(system);
        }
        if !tools.is_empty() {
            request["tools"] = Value::Array(Self::convert_tools(tools));
        }

        info!(
            url = %url,
            model = %model,
            tools_count = tools.len(),
            messages_count = thread.len(),
            "Calling Anthropic API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        let body = read_body("anthropic", response).await?;
        debug!(body_len = body.len(), "Anthropic raw response");
        let resp: MessagesResponse = parse_body("anthropic", &body)?;

        into_turn(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::ToolResult;

    #[test]
    fn test_tool_results_merge_into_one_user_turn() {
        let a = ToolCall::new("tu_a", "crypto_price", json!({"symbol": "bitcoin"}));
        let b = ToolCall::new("tu_b", "current_time", json!({}));
        let thread = vec![
            Message::system("sys one"),
            Message::user("hi"),
            AssistantTurn::with_tool_calls(Some("checking"), vec![a.clone(), b.clone()]).to_message(),
            Message::tool_result(ToolResult::success(&a, json!({"usd": 1}))),
            Message::tool_result(ToolResult::error(&b, "clock broke")),
        ];
        let (system, wire) = AnthropicProvider::convert_messages(&thread);
        assert_eq!(system.as_deref(), Some("sys one"));
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["content"][1]["type"], "tool_use");
        assert_eq!(wire[1]["content"][1]["input"]["symbol"], "bitcoin");
        let results = wire[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "tu_a");
        assert_eq!(results[1]["is_error"], true);
    }

    #[test]
    fn test_temperature_clamped_and_thinking() {
        let mut params = ModelParams::new("claude-sonnet-4-5");
        params.temperature = Some(1.4);
        let mut req = json!({});
        AnthropicProvider::apply_model_params(&mut req, &params);
        assert_eq!(req["temperature"], 1.0);

        params.reasoning_effort = Some("medium".to_string());
        let mut req = json!({});
        AnthropicProvider::apply_model_params(&mut req, &params);
        assert_eq!(req["thinking"]["budget_tokens"], 4096);
        assert!(req.get("temperature").is_none());
    }

    #[test]
    fn test_pdf_becomes_document_block() {
        let r = Attachment::inline("a.pdf", "application/pdf", vec![1]).to_ref();
        let block = AnthropicProvider::attachment_block(&r).unwrap();
        assert_eq!(block["type"], "document");
        assert_eq!(block["source"]["type"], "base64");
    }

    #[test]
    fn test_parse_response_blocks() {
        let body = r#"{"content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"On it"},
            {"type":"tool_use","id":"tu_1","name":"crypto_price","input":{"symbol":"btc"}}],
            "stop_reason":"tool_use","usage":{"input_tokens":5}}"#;
        let resp: MessagesResponse = parse_body("anthropic", body).unwrap();
        assert_eq!(resp.content.len(), 3);
        assert!(matches!(resp.content[0], ContentBlock::Thinking { .. }));

        let body = r#"{"content":[{"type":"server_tool_use","id":"x"}],"stop_reason":"end_turn"}"#;
        let resp: MessagesResponse = parse_body("anthropic", body).unwrap();
        assert!(matches!(resp.content[0], ContentBlock::Other));
    }

    #[test]
    fn test_thinking_blocks_lead_the_follow_up() {
        let body = r#"{"content":[
            {"type":"thinking","thinking":"need a quote","signature":"sig_abc"},
            {"type":"redacted_thinking","data":"enc_xyz"},
            {"type":"tool_use","id":"tu_1","name":"crypto_price","input":{"symbol":"btc"}}],
            "stop_reason":"tool_use"}"#;
        let turn = into_turn(parse_body("anthropic", body).unwrap()).unwrap();
        assert_eq!(turn.reasoning.len(), 2);
        assert_eq!(turn.tool_calls.len(), 1);

        let call = turn.tool_calls[0].clone();
        let thread = vec![
            Message::user("btc?"),
            turn.to_message(),
            Message::tool_result(ToolResult::success(&call, json!({"usd": 1}))),
        ];
        let (_, wire) = AnthropicProvider::convert_messages(&thread);
        let content = wire[1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "thinking");
        assert_eq!(content[0]["signature"], "sig_abc");
        assert_eq!(content[1]["type"], "redacted_thinking");
        assert_eq!(content[1]["data"], "enc_xyz");
        assert_eq!(content[2]["type"], "tool_use");
    }

    #[test]
    fn test_refusal_is_content_blocked() {
        let body = r#"{"content":[],"stop_reason":"refusal"}"#;
        let err = into_turn(parse_body("anthropic", body).unwrap()).unwrap_err();
        assert!(matches!(err, Error::ProviderContentBlocked(_)));
    }
}
