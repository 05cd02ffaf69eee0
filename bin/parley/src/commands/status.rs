use parley_core::{Config, Paths};
use parley_providers::default_provider_name;

use super::{activator, open_store};

pub async fn run(session: &str) -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("parley status");
    println!("=============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found)" }
    );

    let workspace_path = paths.workspace();
    println!(
        "Workspace: {} {}",
        workspace_path.display(),
        if workspace_path.exists() { "✓" } else { "✗ (not found)" }
    );

    if !config_exists {
        println!();
        println!("Run `parley onboard` to initialize.");
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    println!("Model:     {}", config.agents.defaults.model);
    println!();

    println!("Providers:");
    let mut names: Vec<&String> = config.providers.keys().collect();
    names.sort();
    let configured = config.configured_providers();
    for name in names {
        let status = if configured.contains(&name.as_str()) {
            "✓ configured"
        } else {
            "✗ no key"
        };
        println!("  {:<12} {}", name, status);
    }
    println!();
    match default_provider_name(&config) {
        Ok(name) => println!("Default provider: {}", name),
        Err(e) => println!("⚠ {}", e),
    }

    println!();
    println!("Capabilities:");
    let caps = &config.capabilities;
    let mut catalog: Vec<_> = caps.catalog.keys().collect();
    catalog.sort();
    for name in catalog {
        if *name == caps.default {
            println!("  {:<12} default", name);
        } else {
            println!("  {:<12} auto-return after {}s", name, caps.timeout_for(name));
        }
    }

    let store = open_store(&paths)?;
    let state = activator(&config, store.clone()).state(session).await?;
    println!();
    println!("Session {}:", session);
    println!("  Capability: {}", state.active);
    if let Some(at) = state.switched_at {
        println!("  Switched:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(model) = store.get_default_model(session).await? {
        println!("  Model:      {}", model);
    }

    Ok(())
}
