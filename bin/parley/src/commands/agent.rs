use parley_agent::{AgentRuntime, ChannelSink, MessageBus};
use parley_core::{Config, OutputSink, Paths};
use parley_providers::{create_providers, default_provider_name};
use parley_tools::ToolRegistry;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::{inbound, open_store};

pub async fn run(
    message: Option<String>,
    session: String,
    attach: Option<String>,
    ephemeral: bool,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let store = open_store(&paths)?;

    let providers = create_providers(&config);
    let default_provider = default_provider_name(&config)?;
    if !providers.contains_key(&default_provider) {
        anyhow::bail!(
            "Provider '{}' is not usable. Run `parley status` to check the configuration.",
            default_provider
        );
    }
    let registry = ToolRegistry::with_defaults(&config.capabilities);

    let bus = MessageBus::new(100);
    let (mut frontend, backend) = bus.split();
    let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink::new(backend.outbound_tx.clone()));

    let runtime = Arc::new(AgentRuntime::new(
        config,
        paths,
        store,
        sink,
        registry,
        providers,
        &default_provider,
    )?);

    // Timers from an earlier process are gone; re-arm from the stored switch time.
    let probe = inbound(&session, "");
    let context_id = runtime.context_id(&probe);
    if let Err(e) = runtime.activator().resume(&context_id).await {
        warn!(context = %context_id, error = %e, "Failed to restore capability timer");
    }

    if let Some(msg) = message {
        let mut msg = inbound(&session, &msg);
        msg.media = attach.into_iter().collect();
        msg.ephemeral = ephemeral;

        runtime.process_message(msg).await;
        while let Ok(out) = frontend.outbound_rx.try_recv() {
            println!("{}", out.content);
        }
        runtime.activator().scheduler().shutdown();
        return Ok(());
    }

    println!("parley interactive mode (Ctrl+D to exit)");
    println!("Session: {}", session);
    println!("Commands: /status | /use <capability> | /reset | /extend <secs> | /clear | /quit");
    println!();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let loop_handle = tokio::spawn(
        runtime
            .clone()
            .run_loop(backend.inbound_rx, Some(shutdown_tx.subscribe())),
    );

    let mut outbound_rx = frontend.outbound_rx;
    let printer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            println!("\n{}", msg.content);
            println!();
            print!("> ");
            let _ = std::io::stdout().flush();
        }
    });

    let mut pending_attach = attach;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" || input == "/exit" {
            break;
        }
        if input.starts_with('/') {
            if let Err(e) = slash_command(&runtime, &context_id, input).await {
                println!("  {}", e);
            }
            continue;
        }

        let mut msg = inbound(&session, input);
        msg.media = pending_attach.take().into_iter().collect();
        msg.ephemeral = ephemeral;
        if frontend.inbound_tx.send(msg).await.is_err() {
            break;
        }
    }

    info!("Shutting down agent...");
    let _ = shutdown_tx.send(());
    drop(frontend.inbound_tx);
    let _ = loop_handle.await;
    // The runtime still holds the sink; give in-flight output a moment before exit.
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer_handle.abort();
    Ok(())
}

async fn slash_command(runtime: &AgentRuntime, context_id: &str, input: &str) -> anyhow::Result<()> {
    let mut parts = input.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();
    let activator = runtime.activator();

    match command {
        "/status" => {
            let state = activator.state(context_id).await?;
            println!("  Capability: {}", state.active);
            if let Some(remaining) = activator.scheduler().remaining(context_id) {
                println!("  Returns to '{}' in {}s", activator.default_capability(), remaining.as_secs());
            }
            let (provider, _) = runtime.orchestrator().provider_for(context_id).await?;
            println!("  Provider:   {}", provider);
        }
        "/use" => {
            if arg.is_empty() {
                println!("  Usage: /use <capability>");
                return Ok(());
            }
            let activation = activator.ensure_active(context_id, arg).await?;
            if !activation.switched {
                println!("  '{}' is already active", activation.capability);
            }
        }
        "/reset" => {
            let activation = activator.reset(context_id).await?;
            if !activation.switched {
                println!("  Already on '{}'", activation.capability);
            }
        }
        "/extend" => {
            let Ok(secs) = arg.parse::<u64>() else {
                println!("  Usage: /extend <seconds>");
                return Ok(());
            };
            let remaining = activator
                .scheduler()
                .extend(context_id, Duration::from_secs(secs))?;
            println!("  Auto-return in {}s", remaining.as_secs());
        }
        "/clear" => {
            runtime.clear_history(context_id).await?;
            println!("  History cleared");
        }
        other => println!("  Unknown command: {}", other),
    }
    Ok(())
}
