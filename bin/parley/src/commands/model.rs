use parley_agent::PROVIDER_KEY;
use parley_core::{Config, Paths};
use parley_providers::{default_provider_name, infer_provider_from_model};

use super::open_store;

pub async fn set(session: &str, model: &str, provider: Option<&str>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    if let Some(name) = provider {
        if name != "ollama" && config.get_provider(name).is_none() {
            anyhow::bail!("Provider '{}' is not in the providers section of the config", name);
        }
    } else if let Some(inferred) = infer_provider_from_model(model) {
        println!(
            "Hint: '{}' looks like a {} model; pass --provider {} to switch backends too.",
            model, inferred, inferred
        );
    }

    let store = open_store(&paths)?;
    store.set_default_model(session, model).await?;
    if let Some(name) = provider {
        store.set_key(session, PROVIDER_KEY, name).await?;
    }

    println!("✓ {} now uses model '{}'", session, model);
    if let Some(name) = provider {
        println!("  Provider: {}", name);
    }
    Ok(())
}

pub async fn show(session: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let store = open_store(&paths)?;

    let model = store.get_default_model(session).await?;
    let provider = store.get_key(session, PROVIDER_KEY).await?;

    println!("Session:  {}", session);
    match model {
        Some(m) => println!("Model:    {}", m),
        None => println!("Model:    {} (default)", config.agents.defaults.model),
    }
    match provider {
        Some(p) => println!("Provider: {}", p),
        None => match default_provider_name(&config) {
            Ok(p) => println!("Provider: {} (default)", p),
            Err(_) => println!("Provider: none configured"),
        },
    }
    Ok(())
}
