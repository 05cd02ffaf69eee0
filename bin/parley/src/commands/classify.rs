use parley_agent::{IntentClassifier, PriorActivations};
use parley_core::{Config, Paths};

/// Score a text without history, the way the first message of a session is scored.
pub async fn run(text: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let classifier = IntentClassifier::from_config(&config.capabilities)?;

    let signals = classifier.score(text, &PriorActivations::new());
    if signals.is_empty() {
        println!("No capabilities besides '{}' are configured.", config.capabilities.default);
        return Ok(());
    }

    println!("{:<12} {:>10} {:>10}  selected", "capability", "confidence", "threshold");
    for signal in &signals {
        let threshold = config
            .capabilities
            .catalog
            .get(&signal.capability)
            .map(|c| c.threshold)
            .unwrap_or_default();
        println!(
            "{:<12} {:>10.2} {:>10.2}  {}",
            signal.capability,
            signal.confidence,
            threshold,
            if signal.selected { "yes" } else { "" }
        );
    }
    Ok(())
}
