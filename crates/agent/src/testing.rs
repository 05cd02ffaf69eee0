//! Scripted collaborators shared by the unit tests of this crate.

use async_trait::async_trait;
use parley_core::types::{AssistantTurn, Attachment, ContentPart, Message, ModelParams, ToolSchema};
use parley_core::{OutputSink, Result, ToolError};
use parley_providers::Provider;
use parley_tools::{Tool, ToolContext};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn send_text(&self, context_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((context_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Replays canned responses and records every request it receives.
/// Once the script runs out it answers with `fallback`, or plain "done".
#[derive(Default)]
pub struct ScriptedProvider {
    pub script: Mutex<VecDeque<Result<AssistantTurn>>>,
    pub fallback: Option<AssistantTurn>,
    pub requests: Mutex<Vec<(Vec<Message>, Vec<String>)>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<AssistantTurn>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Thread and tool names sent with the `i`-th request.
    pub fn request(&self, i: usize) -> (Vec<Message>, Vec<String>) {
        self.requests.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn ingest_attachment(&self, attachment: &Attachment) -> Result<ContentPart> {
        Ok(ContentPart::Attachment(attachment.to_ref()))
    }

    async fn complete(
        &self,
        thread: &[Message],
        tools: &[ToolSchema],
        _params: &ModelParams,
    ) -> Result<AssistantTurn> {
        self.requests
            .lock()
            .unwrap()
            .push((thread.to_vec(), tools.iter().map(|t| t.name.clone()).collect()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(self
                .fallback
                .clone()
                .unwrap_or_else(|| AssistantTurn::text("done"))),
        }
    }
}

/// Stands in for `crypto_price` without touching the network.
pub struct FixedPriceTool;

#[async_trait]
impl Tool for FixedPriceTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "crypto_price".to_string(),
            description: "Fixed price".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn invoke(
        &self,
        _ctx: &ToolContext,
        _args: &Map<String, Value>,
    ) -> std::result::Result<Value, ToolError> {
        Ok(json!({"symbol": "btc", "usd": 64000.0}))
    }
}
