use async_trait::async_trait;
use chrono::Utc;
use parley_core::types::Message;
use parley_core::{Error, HistoryStore, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub(crate) const ACTIVE_CAPABILITY_KEY: &str = "active_capability";
pub(crate) const DEFAULT_MODEL_KEY: &str = "default_model";

/// SQLite-backed thread and settings store.
///
/// Threads are stored as one JSON document per `(context, provider)`;
/// per-context settings live in a key/value table. Every write is a
/// single-row upsert.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    inner: Arc<Mutex<Connection>>,
}

fn storage_err(action: &str, e: rusqlite::Error) -> Error {
    Error::Storage(format!("{}: {}", action, e))
}

impl SqliteHistoryStore {
    /// Open (or create) the history database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create db directory: {}", e)))?;
        }
        let conn = Connection::open(db_path).map_err(|e| storage_err("Failed to open history db", e))?;

        // WAL keeps readers from blocking the writer
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        info!(path = %db_path.display(), "History store opened");
        Ok(store)
    }

    /// Private in-process database, used by tests and one-shot runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage_err("Failed to open history db", e))?;
        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS threads (
                context_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                messages TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (context_id, provider)
            );

            CREATE TABLE IF NOT EXISTS context_settings (
                context_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (context_id, key)
            );
            ",
        )
        .map_err(|e| storage_err("Failed to init history schema", e))?;
        debug!("History store schema initialized");
        Ok(())
    }

    fn read_setting(&self, context_id: &str, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM context_settings WHERE context_id = ?1 AND key = ?2",
            params![context_id, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| storage_err("Query error", e))
    }

    fn write_setting(&self, context_id: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO context_settings (context_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(context_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![context_id, key, value, Utc::now().to_rfc3339()],
        )
        .map_err(|e| storage_err("Upsert error", e))?;
        Ok(())
    }

    /// Number of stored threads across all contexts.
    pub fn thread_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))
            .map_err(|e| storage_err("Query error", e))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn load_thread(&self, context_id: &str, provider: &str) -> Result<Vec<Message>> {
        let raw: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT messages FROM threads WHERE context_id = ?1 AND provider = ?2",
                params![context_id, provider],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err("Query error", e))?
        };
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_thread(&self, context_id: &str, provider: &str, thread: &[Message]) -> Result<()> {
        let raw = serde_json::to_string(thread)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO threads (context_id, provider, messages, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(context_id, provider) DO UPDATE SET messages = excluded.messages, updated_at = excluded.updated_at",
            params![context_id, provider, raw, Utc::now().to_rfc3339()],
        )
        .map_err(|e| storage_err("Upsert error", e))?;
        debug!(context = %context_id, provider = %provider, messages = thread.len(), "Thread saved");
        Ok(())
    }

    async fn clear_thread(&self, context_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM threads WHERE context_id = ?1", params![context_id])
            .map_err(|e| storage_err("Delete error", e))?;
        debug!(context = %context_id, removed, "Threads cleared");
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
