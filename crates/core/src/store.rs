use async_trait::async_trait;

use crate::error::Result;
use crate::types::Message;

/// Persistence for threads and per-context settings.
///
/// Every record is partitioned by context id. Writes are single-row
/// upserts, so no cross-context locking is needed.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Thread for `(context, provider)`; empty when none was saved.
    async fn load_thread(&self, context_id: &str, provider: &str) -> Result<Vec<Message>>;

    async fn save_thread(&self, context_id: &str, provider: &str, thread: &[Message]) -> Result<()>;

    /// Drop the threads of every provider for the context.
    async fn clear_thread(&self, context_id: &str) -> Result<()>;

    async fn get_active_capability(&self, context_id: &str) -> Result<Option<String>>;

    async fn set_active_capability(&self, context_id: &str, capability: &str) -> Result<()>;

    async fn get_default_model(&self, context_id: &str) -> Result<Option<String>>;

    async fn set_default_model(&self, context_id: &str, model: &str) -> Result<()>;

    async fn get_key(&self, context_id: &str, key: &str) -> Result<Option<String>>;

    async fn set_key(&self, context_id: &str, key: &str, value: &str) -> Result<()>;
}
