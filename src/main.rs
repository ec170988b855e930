//! dockspace - Main entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dockspace::cli::{Cli, Command, run_check_command, run_down_command, run_up_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockspace=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Up(args) => run_up_command(args).await,
        Command::Down { id } => run_down_command(&id).await,
        Command::Check => run_check_command().await,
    }
}
