use parley_core::config::ProviderConfig;
use parley_core::{Config, Paths};
use std::io::{self, Write};

const AGENTS_MD: &str = r#"# Agent Guidelines

You are parley, a helpful conversational assistant.

## Core Behaviors
- Be helpful, accurate, and concise
- Use tools when a question needs live data (prices, exchange rates, time)
- Save notes only when the user asks you to remember something
- Ask for clarification when instructions are ambiguous
"#;

const SOUL_MD: &str = r#"# Personality

I am parley, a friendly and precise assistant.

## Communication Style
- Clear and concise
- Professional yet friendly
- Say so when a tool fails instead of guessing
"#;

const USER_MD: &str = r#"# User Preferences

<!-- Add your preferences here -->

## Language
- Preferred language: English
"#;

pub async fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();

    if paths.config_file().exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    paths.ensure_dirs()?;

    // Placeholders so the user only has to fill in a key
    let mut config = Config::default();
    for name in ["anthropic", "openai", "gemini"] {
        config
            .providers
            .insert(name.to_string(), ProviderConfig::default());
    }
    config.save(&paths.config_file())?;
    println!("✓ Created config: {}", paths.config_file().display());

    write_if_not_exists(&paths.agents_md(), AGENTS_MD)?;
    write_if_not_exists(&paths.soul_md(), SOUL_MD)?;
    write_if_not_exists(&paths.user_md(), USER_MD)?;

    println!("✓ Created workspace: {}", paths.workspace().display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to add your API keys", paths.config_file().display());
    println!("  2. Run `parley status` to verify configuration");
    println!("  3. Run `parley agent` to start chatting");

    Ok(())
}

fn write_if_not_exists(path: &std::path::Path, content: &str) -> io::Result<()> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        println!("  ✓ Created {}", name);
    }
    Ok(())
}
