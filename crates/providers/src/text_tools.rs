//! Recovery of tool calls that a model wrote into plain text as
//! `<tool_call>{"name": ..., "arguments": {...}}</tool_call>` blocks.
//! Used for local models whose native tool calling is unreliable.

use parley_core::types::ToolCall;
use serde_json::Value;
use tracing::warn;

const OPEN: &str = "<tool_call>";
const CLOSE: &str = "</tool_call>";

/// Split `content` into remaining text and the tool calls found in it.
pub fn extract_tool_calls(content: &str, id_prefix: &str) -> (String, Vec<ToolCall>) {
    let mut calls = Vec::new();
    let mut remaining = String::new();
    let mut rest = content;

    while let Some(start) = rest.find(OPEN) {
        remaining.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            remaining.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let raw = after[..end].trim();
        match serde_json::from_str::<Value>(raw) {
            Ok(block) => {
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let arguments = block.get("arguments").cloned().unwrap_or(Value::Null);
                calls.push(ToolCall::new(
                    format!("{}_{}", id_prefix, calls.len()),
                    name,
                    arguments,
                ));
            }
            Err(e) => {
                warn!(error = %e, block = %raw, "Unparseable text tool call, keeping as text");
                remaining.push_str(&rest[start..start + OPEN.len() + end + CLOSE.len()]);
            }
        }
        rest = &after[end + CLOSE.len()..];
    }
    remaining.push_str(rest);

    (remaining.trim().to_string(), calls)
}

/// Prompt section describing the tools for models without native tool support.
pub fn tools_prompt(tools: &[parley_core::types::ToolSchema]) -> String {
    let mut s = String::from("\n\n## Available Tools\n");
    s.push_str("To call a tool, output a block exactly like:\n");
    s.push_str("<tool_call>\n{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n</tool_call>\n");
    s.push_str("Wait for the result before answering. Do not invent results.\n\n");
    for tool in tools {
        s.push_str(&format!("### {}\n{}\n", tool.name, tool.description));
        if let Ok(params) = serde_json::to_string(&tool.parameters) {
            s.push_str(&format!("Parameters: {}\n", params));
        }
        s.push('\n');
    }
    s
}
