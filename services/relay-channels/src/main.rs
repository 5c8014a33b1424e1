//! Relay bot - main entry point.

use anyhow::Result;
use clap::Parser;
use relay_channels::run;
use relay_common::logging::init_logging;
use relay_common::Config;

/// Relay direct messages from one Matrix user to a local Ollama model.
#[derive(Debug, Parser)]
#[command(name = "relay-bot", version, about)]
struct Cli {
    /// Path to config.toml (defaults to $RELAY_CONFIG, ./config.toml, then ~/.ollama-relay/config.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load_and_validate(cli.config.as_deref())?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Relay bot v{}", env!("CARGO_PKG_VERSION"));

    run(&config).await
}
