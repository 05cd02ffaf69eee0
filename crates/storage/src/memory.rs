use async_trait::async_trait;
use parley_core::types::Message;
use parley_core::{Error, HistoryStore, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::history::{ACTIVE_CAPABILITY_KEY, DEFAULT_MODEL_KEY};

#[derive(Default)]
struct Tables {
    threads: HashMap<(String, String), Vec<Message>>,
    settings: HashMap<(String, String), String>,
}

/// Process-local store. Nothing survives a restart; used for tests and
/// `--ephemeral` runs.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    fn read_setting(&self, context_id: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .tables()?
            .settings
            .get(&(context_id.to_string(), key.to_string()))
            .cloned())
    }

    fn write_setting(&self, context_id: &str, key: &str, value: &str) -> Result<()> {
        self.tables()?
            .settings
            .insert((context_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn load_thread(&self, context_id: &str, provider: &str) -> Result<Vec<Message>> {
        Ok(self
            .tables()?
            .threads
            .get(&(context_id.to_string(), provider.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_thread(&self, context_id: &str, provider: &str, thread: &[Message]) -> Result<()> {
        self.tables()?
            .threads
            .insert((context_id.to_string(), provider.to_string()), thread.to_vec());
        Ok(())
    }

    async fn clear_thread(&self, context_id: &str) -> Result<()> {
        self.tables()?.threads.retain(|(ctx, _), _| ctx != context_id);
        Ok(())
    }

    async fn get_active_capability(&self, context_id: &str) -> Result<Option<String>> {
        self.read_setting(context_id, ACTIVE_CAPABILITY_KEY)
    }

    async fn set_active_capability(&self, context_id: &str, capability: &str) -> Result<()> {
        self.write_setting(context_id, ACTIVE_CAPABILITY_KEY, capability)
    }

    async fn get_default_model(&self, context_id: &str) -> Result<Option<String>> {
        self.read_setting(context_id, DEFAULT_MODEL_KEY)
    }

    async fn set_default_model(&self, context_id: &str, model: &str) -> Result<()> {
        self.write_setting(context_id, DEFAULT_MODEL_KEY, model)
    }

    async fn get_key(&self, context_id: &str, key: &str) -> Result<Option<String>> {
        self.read_setting(context_id, key)
    }

    async fn set_key(&self, context_id: &str, key: &str, value: &str) -> Result<()> {
        self.write_setting(context_id, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threads_and_settings() {
        let store = InMemoryHistoryStore::new();
        store.save_thread("cli:a", "openai", &[Message::user("hi")]).await.unwrap();
        store.save_thread("cli:a", "ollama", &[Message::user("yo")]).await.unwrap();
        store.save_thread("cli:b", "openai", &[Message::user("hey")]).await.unwrap();
        assert_eq!(store.load_thread("cli:a", "openai").await.unwrap().len(), 1);

        store.clear_thread("cli:a").await.unwrap();
        assert!(store.load_thread("cli:a", "openai").await.unwrap().is_empty());
        assert!(store.load_thread("cli:a", "ollama").await.unwrap().is_empty());
        assert_eq!(store.load_thread("cli:b", "openai").await.unwrap().len(), 1);

        store.set_active_capability("cli:a", "price").await.unwrap();
        assert_eq!(store.get_active_capability("cli:a").await.unwrap().as_deref(), Some("price"));
        assert_eq!(store.get_key("cli:a", ACTIVE_CAPABILITY_KEY).await.unwrap().as_deref(), Some("price"));
    }
}
