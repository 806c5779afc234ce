use clap::Parser;
use dotenv::dotenv;

use shipsync::cli::{Cli, Commands};
use shipsync::commands;
use shipsync::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load SHIPSYNC_* credentials from .env
    dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.verbose)?;

    match &cli.command {
        Commands::Recognize { tracking_number } => commands::run_recognize(tracking_number)?,
        Commands::SyncAll { orders, sync } => commands::run_sync_all(orders, sync).await?,
        Commands::SyncOne { orders, id, sync } => commands::run_sync_one(orders, id, sync).await?,
        Commands::Daemon {
            orders,
            health_port,
            sync,
        } => commands::run_daemon(orders, *health_port, sync).await?,
    }

    Ok(())
}
