use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

/// Destination for text addressed to a conversation context.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn send_text(&self, context_id: &str, text: &str) -> Result<()>;
}

/// Send and log on failure. Delivery problems never fail a turn.
pub async fn deliver(sink: &dyn OutputSink, context_id: &str, text: &str) {
    if let Err(e) = sink.send_text(context_id, text).await {
        warn!(context = %context_id, error = %e, "Failed to deliver text to output sink");
    }
}
