mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "A conversational agent with auto-activating capabilities", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize parley configuration and workspace
    Onboard {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration status
    Status {
        /// Session to report capability state for
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },

    /// Run the agent
    Agent {
        /// Message to send (interactive mode if not provided)
        #[arg(short, long)]
        message: Option<String>,

        /// Session ID
        #[arg(short, long, default_value = "cli:default")]
        session: String,

        /// Attach a local file or URL to the message
        #[arg(short, long)]
        attach: Option<String>,

        /// Do not save the conversation
        #[arg(long)]
        ephemeral: bool,
    },

    /// Score a text against the capability catalog
    Classify {
        /// Text to classify
        text: String,
    },

    /// Inspect or change the active capability of a session
    Capability {
        #[command(subcommand)]
        command: CapabilityCommands,
    },

    /// Manage saved conversation history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },

    /// Per-session model and provider choice
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

#[derive(Subcommand)]
enum CapabilityCommands {
    /// Show the active capability and the catalog
    Show {
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },
    /// Activate a capability
    Set {
        /// Capability name
        capability: String,
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },
    /// Return to the default capability
    Reset {
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// Forget the conversation of a session
    Clear {
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// Use a model (and optionally a provider) for a session
    Set {
        /// Model name, e.g. "claude-sonnet-4-5" or "ollama/llama3.1"
        model: String,
        /// Provider name from the config
        #[arg(long)]
        provider: Option<String>,
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },
    /// Show the model and provider a session uses
    Show {
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Onboard { force } => {
            commands::onboard::run(force).await?;
        }
        Commands::Status { session } => {
            commands::status::run(&session).await?;
        }
        Commands::Agent {
            message,
            session,
            attach,
            ephemeral,
        } => {
            commands::agent::run(message, session, attach, ephemeral).await?;
        }
        Commands::Classify { text } => {
            commands::classify::run(&text).await?;
        }
        Commands::Capability { command } => match command {
            CapabilityCommands::Show { session } => {
                commands::capability::show(&session).await?;
            }
            CapabilityCommands::Set {
                capability,
                session,
            } => {
                commands::capability::set(&session, &capability).await?;
            }
            CapabilityCommands::Reset { session } => {
                commands::capability::reset(&session).await?;
            }
        },
        Commands::History { command } => match command {
            HistoryCommands::Clear { session } => {
                commands::history::clear(&session).await?;
            }
        },
        Commands::Model { command } => match command {
            ModelCommands::Set {
                model,
                provider,
                session,
            } => {
                commands::model::set(&session, &model, provider.as_deref()).await?;
            }
            ModelCommands::Show { session } => {
                commands::model::show(&session).await?;
            }
        },
    }

    Ok(())
}
