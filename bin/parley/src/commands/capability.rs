use parley_core::{Config, Paths};

use super::{activator, open_store};

pub async fn show(session: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let store = open_store(&paths)?;
    let state = activator(&config, store).state(session).await?;

    println!("Session:    {}", session);
    println!("Active:     {}", state.active);
    if let Some(at) = state.switched_at {
        println!("Switched:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(timeout) = state.timeout_seconds {
        println!("Timeout:    {}s without activity", timeout);
    }

    println!();
    println!("Catalog:");
    let caps = &config.capabilities;
    let mut names: Vec<_> = caps.catalog.keys().collect();
    names.sort();
    for name in names {
        let cap = &caps.catalog[name];
        let marker = if *name == state.active { "*" } else { " " };
        println!("{} {:<12} {}", marker, name, cap.description);
        if !cap.tools.is_empty() {
            println!("    tools: {}", cap.tools.join(", "));
        }
    }
    Ok(())
}

pub async fn set(session: &str, capability: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let store = open_store(&paths)?;
    let activation = activator(&config, store).ensure_active(session, capability).await?;

    if activation.switched {
        println!(
            "✓ {}: '{}' -> '{}'",
            session, activation.previous, activation.capability
        );
        if capability != config.capabilities.default {
            println!(
                "  Returns to '{}' after {}s without activity.",
                config.capabilities.default,
                config.capabilities.timeout_for(capability)
            );
        }
    } else {
        println!("'{}' is already active for {}", capability, session);
    }
    Ok(())
}

pub async fn reset(session: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let store = open_store(&paths)?;
    let activation = activator(&config, store).reset(session).await?;

    if activation.switched {
        println!("✓ {} is back on '{}'", session, activation.capability);
    } else {
        println!("{} is already on '{}'", session, activation.capability);
    }
    Ok(())
}
