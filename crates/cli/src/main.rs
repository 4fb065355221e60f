//! voxline CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: write a default config to `~/.voxline`
//! - `serve`: start the call WebSocket server
//! - `chat`: talk to the agent from the console
//! - `bench`: measure streaming latency per model

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use voxline_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "voxline",
    about = "voxline: streaming voice-call agent server",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to load instead of ~/.voxline/config.toml
    #[arg(short, long, global = true, env = "VOXLINE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Onboard,

    /// Start the call server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a call session in the console
    Chat {
        /// Say one thing and print the reply instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Time first content and full streams for one or more models
    Bench {
        /// Comma-separated models, each `model` or `provider:model`
        #[arg(long, value_delimiter = ',')]
        models: Vec<String>,

        /// Caller utterance to send
        #[arg(long, default_value = "my heater is broken")]
        prompt: String,

        /// Streams per model
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    if let Commands::Onboard = cli.command {
        return commands::onboard::run().await;
    }

    let config = AppConfig::load_with(cli.config.as_deref()).map_err(|e| format!("Failed to load config: {e}"))?;

    match cli.command {
        Commands::Onboard => {}
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Chat { message } => commands::chat::run(config, message).await?,
        Commands::Bench { models, prompt, runs } => commands::bench::run(config, models, prompt, runs).await?,
    }

    Ok(())
}
