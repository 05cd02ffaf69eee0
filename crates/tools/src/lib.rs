pub mod clock;
pub mod crypto;
pub mod currency;
pub mod notes;
pub mod registry;

use async_trait::async_trait;
use parley_core::types::ToolSchema;
use parley_core::{HistoryStore, ToolError};
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub use registry::{ToolRegistry, Toolset};

/// What a tool may touch while it runs: the calling context and its store.
#[derive(Clone)]
pub struct ToolContext {
    pub context_id: String,
    pub store: Arc<dyn HistoryStore>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    /// Run the tool. Failures come back as `ToolError` and are handed to the
    /// model as an error result; they never abort the turn.
    async fn invoke(&self, ctx: &ToolContext, args: &Map<String, Value>) -> Result<Value, ToolError>;
}

/// Required string argument, trimmed and non-empty.
pub(crate) fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{}' is required", key)))
}

pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// HTTP client for tools that call public web APIs.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent("parley-agent")
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a failed web API call onto the tool error taxonomy.
pub(crate) fn request_error(service: &str, e: reqwest::Error) -> ToolError {
    if e.is_timeout() || e.is_connect() {
        ToolError::Unavailable(format!("{} unreachable: {}", service, e))
    } else {
        ToolError::Execution(format!("{} request failed: {}", service, e))
    }
}
