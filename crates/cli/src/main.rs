//! Ragline CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Interactive terminal chat
//! - `ask`     — Single prompt, answer on stdout
//! - `serve`   — Start the HTTP gateway
//! - `memory`  — Inspect or seed the knowledge store
//! - `init`    — Write the default config file
//! - `doctor`  — Diagnose configuration and startup preconditions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod stack;

#[derive(Parser)]
#[command(
    name = "ragline",
    about = "Ragline — retrieval-augmented generation agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.ragline/config.toml)
    #[arg(short, long, global = true, env = "RAGLINE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model in the terminal
    Chat {
        /// System prompt sent with every line
        #[arg(short, long, default_value = "")]
        system: String,

        /// Print the model's reasoning before each answer
        #[arg(long)]
        show_reasoning: bool,
    },

    /// Send a single prompt and print the answer
    Ask {
        /// The prompt
        #[arg(short, long)]
        message: String,

        /// System prompt
        #[arg(short, long, default_value = "")]
        system: String,

        /// Print the model's reasoning before the answer
        #[arg(long)]
        show_reasoning: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or seed the knowledge store
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Diagnose configuration and startup preconditions
    Doctor,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Remember a note
    Add { text: String },

    /// Show the texts nearest to a query
    Search {
        query: String,

        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Count stored entries
    Count,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Chat {
            system,
            show_reasoning,
        } => commands::chat::run(config, system, show_reasoning).await?,
        Commands::Ask {
            message,
            system,
            show_reasoning,
        } => commands::ask::run(config, message, system, show_reasoning).await?,
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Memory { action } => match action {
            MemoryAction::Add { text } => commands::memory::add(config, &text).await?,
            MemoryAction::Search { query, k } => commands::memory::search(config, &query, k).await?,
            MemoryAction::Count => commands::memory::count(config).await?,
        },
        Commands::Init { force } => commands::init::run(config, force).await?,
        Commands::Doctor => commands::doctor::run(config).await?,
    }

    Ok(())
}
