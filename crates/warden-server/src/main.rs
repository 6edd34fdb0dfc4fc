// crates/warden-server/src/main.rs
// Warden - policy guardrails for AI coding agents

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use warden::cli::{Cli, Commands, ConfigAction};
use warden::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is a convenience for local runs; real deployments set the
    // environment directly.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    match cli.command {
        None | Some(Commands::Serve { ephemeral: false }) => {
            warden::cli::run_server(config, false).await
        }
        Some(Commands::Serve { ephemeral: true }) => warden::cli::run_server(config, true).await,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => warden::cli::run_config_show(&config),
            ConfigAction::Check => warden::cli::run_config_check(&config),
        },
    }
}
