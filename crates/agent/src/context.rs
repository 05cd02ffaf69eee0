use async_trait::async_trait;
use parley_core::config::CapabilitiesConfig;
use parley_core::{HistoryStore, Paths, Result};
use parley_tools::notes::load_notes;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Builds the system instructions that seed a new thread.
#[async_trait]
pub trait InstructionComposer: Send + Sync {
    async fn compose(&self, context_id: &str) -> Result<String>;
}

/// Fixed instructions. Handy for embedding and tests.
pub struct StaticComposer(pub String);

#[async_trait]
impl InstructionComposer for StaticComposer {
    async fn compose(&self, _context_id: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Instructions assembled from the workspace bootstrap files, the
/// capability catalog and the notes saved for the context.
pub struct WorkspaceComposer {
    paths: Paths,
    store: Arc<dyn HistoryStore>,
    capabilities: CapabilitiesConfig,
}

impl WorkspaceComposer {
    pub fn new(paths: Paths, store: Arc<dyn HistoryStore>, capabilities: CapabilitiesConfig) -> Self {
        Self {
            paths,
            store,
            capabilities,
        }
    }

    fn load_file_if_exists<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        std::fs::read_to_string(path)
            .ok()
            .filter(|s| !s.trim().is_empty())
    }
}

#[async_trait]
impl InstructionComposer for WorkspaceComposer {
    async fn compose(&self, context_id: &str) -> Result<String> {
        let mut prompt = String::new();

        prompt.push_str("You are parley, a conversational assistant with access to tools.\n\n");

        if let Some(content) = self.load_file_if_exists(self.paths.agents_md()) {
            prompt.push_str("## Agent Guidelines\n");
            prompt.push_str(&content);
            prompt.push_str("\n\n");
        }

        if let Some(content) = self.load_file_if_exists(self.paths.soul_md()) {
            prompt.push_str("## Personality\n");
            prompt.push_str(&content);
            prompt.push_str("\n\n");
        }

        if let Some(content) = self.load_file_if_exists(self.paths.user_md()) {
            prompt.push_str("## User Preferences\n");
            prompt.push_str(&content);
            prompt.push_str("\n\n");
        }

        prompt.push_str("## Capabilities\n");
        prompt.push_str(
            "Tools are grouped into capabilities. Calling a tool from another capability switches to it.\n",
        );
        for (name, cap) in &self.capabilities.catalog {
            let marker = if *name == self.capabilities.default {
                " (default)"
            } else {
                ""
            };
            prompt.push_str(&format!(
                "- {}{}: {} [{}]\n",
                name,
                marker,
                cap.description,
                cap.tools.join(", ")
            ));
        }
        prompt.push('\n');

        prompt.push_str("## Tools\n");
        prompt.push_str("- Use tools for live data; never invent prices, rates or times.\n");
        prompt.push_str("- Answer directly when no tool is needed.\n\n");

        let now = chrono::Utc::now();
        prompt.push_str(&format!("Current time: {}\n", now.format("%Y-%m-%d %H:%M:%S UTC")));

        match load_notes(self.store.as_ref(), context_id).await {
            Ok(notes) if !notes.is_empty() => {
                prompt.push_str("\n## Saved Notes\n");
                for note in notes {
                    prompt.push_str(&format!("- {}\n", note.text));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(context = %context_id, error = %e, "Failed to load notes for instructions"),
        }

        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_storage::InMemoryHistoryStore;

    #[tokio::test]
    async fn test_compose_includes_workspace_files_and_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.soul_md(), "Be warm and brief.").unwrap();
        std::fs::write(paths.user_md(), "   ").unwrap();

        let store = Arc::new(InMemoryHistoryStore::new());
        let composer = WorkspaceComposer::new(paths, store, CapabilitiesConfig::default());
        let prompt = composer.compose("cli:default").await.unwrap();

        assert!(prompt.contains("## Personality\nBe warm and brief."));
        assert!(!prompt.contains("## User Preferences"));
        assert!(!prompt.contains("## Agent Guidelines"));
        assert!(prompt.contains("- chat (default): General conversation [current_time]"));
        assert!(prompt.contains("- price: Live cryptocurrency prices [crypto_price]"));
        assert!(prompt.contains("Current time: "));
        assert!(!prompt.contains("## Saved Notes"));
    }

    #[tokio::test]
    async fn test_static_composer() {
        let composer = StaticComposer("be brief".to_string());
        assert_eq!(composer.compose("x").await.unwrap(), "be brief");
    }
}
