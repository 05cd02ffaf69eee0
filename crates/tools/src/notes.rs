//! Short notes the assistant keeps for a context, stored as a JSON list
//! under one key of the history store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::types::ToolSchema;
use parley_core::{HistoryStore, Result, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{optional_str, required_str, Tool, ToolContext};

pub const NOTES_KEY: &str = "notes";
const MAX_NOTES: usize = 50;
const MAX_NOTE_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    pub saved_at: DateTime<Utc>,
}

/// Notes saved for a context, oldest first. A corrupt entry reads as empty.
pub async fn load_notes(store: &dyn HistoryStore, context_id: &str) -> Result<Vec<Note>> {
    let Some(raw) = store.get_key(context_id, NOTES_KEY).await? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(notes) => Ok(notes),
        Err(e) => {
            warn!(context = %context_id, error = %e, "Discarding unreadable notes");
            Ok(Vec::new())
        }
    }
}

async fn save_notes(store: &dyn HistoryStore, context_id: &str, notes: &[Note]) -> Result<()> {
    let raw = serde_json::to_string(notes)?;
    store.set_key(context_id, NOTES_KEY, &raw).await
}

fn store_error(e: parley_core::Error) -> ToolError {
    ToolError::Unavailable(format!("note storage failed: {}", e))
}

pub struct RememberTool;

pub struct RecallTool;

#[async_trait]
impl Tool for RememberTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "remember".to_string(),
            description: "Save a short note about the user or conversation (a preference, a fact, a decision) so it can be recalled later.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "The note to save, one fact per call."}
                },
                "required": ["text"]
            }),
        }
    }

    async fn invoke(&self, ctx: &ToolContext, args: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
        let text = required_str(args, "text")?;
        if text.chars().count() > MAX_NOTE_CHARS {
            return Err(ToolError::InvalidArguments(format!(
                "note is longer than {} characters",
                MAX_NOTE_CHARS
            )));
        }

        let mut notes = load_notes(ctx.store.as_ref(), &ctx.context_id)
            .await
            .map_err(store_error)?;
        if notes.iter().any(|n| n.text.eq_ignore_ascii_case(text)) {
            return Ok(json!({"saved": false, "reason": "already remembered", "count": notes.len()}));
        }
        notes.push(Note {
            text: text.to_string(),
            saved_at: Utc::now(),
        });
        if notes.len() > MAX_NOTES {
            let overflow = notes.len() - MAX_NOTES;
            notes.drain(..overflow);
        }
        save_notes(ctx.store.as_ref(), &ctx.context_id, &notes)
            .await
            .map_err(store_error)?;
        debug!(context = %ctx.context_id, count = notes.len(), "Note saved");
        Ok(json!({"saved": true, "count": notes.len()}))
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "recall".to_string(),
            description: "List saved notes, optionally only those containing a search term.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Case-insensitive search term. Omit to list everything."}
                }
            }),
        }
    }

    async fn invoke(&self, ctx: &ToolContext, args: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
        let notes = load_notes(ctx.store.as_ref(), &ctx.context_id)
            .await
            .map_err(store_error)?;
        let query = optional_str(args, "query").map(str::to_lowercase);
        let matches: Vec<&Note> = notes
            .iter()
            .filter(|n| match &query {
                Some(q) => n.text.to_lowercase().contains(q),
                None => true,
            })
            .collect();
        Ok(json!({"count": matches.len(), "notes": matches}))
    }
}
