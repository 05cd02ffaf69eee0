use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".parley"))
            .unwrap_or_else(|| PathBuf::from(".parley"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn workspace(&self) -> PathBuf {
        self.base.join("workspace")
    }

    /// SQLite database holding threads and per-context settings.
    pub fn history_db(&self) -> PathBuf {
        self.base.join("parley.db")
    }

    // Workspace files read by the instruction composer
    pub fn agents_md(&self) -> PathBuf {
        self.workspace().join("AGENTS.md")
    }

    pub fn soul_md(&self) -> PathBuf {
        self.workspace().join("SOUL.md")
    }

    pub fn user_md(&self) -> PathBuf {
        self.workspace().join("USER.md")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.workspace())?;
        Ok(())
    }
}
