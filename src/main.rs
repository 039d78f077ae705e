mod chain;
mod commands;
mod config;
mod db;
mod decoder;
mod metadata;
mod rpc;
mod sync;
mod types;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Chain Scanner - index blocks, extrinsics, events and transfers of a Substrate chain
#[derive(Parser, Debug)]
#[command(name = "scanner")]
#[command(version, about = "Block indexer for Substrate-based chains")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backfill finalized history, then follow the chain head
    Sync(commands::SyncArgs),

    /// Redecode one block and overwrite the stored copy
    Reindex(commands::ReindexArgs),

    /// Show indexing progress or the stored contents of a block
    Status(commands::StatusArgs),

    /// Manage configuration
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sync(args) => commands::sync::run(args).await,
        Commands::Reindex(args) => commands::reindex::run(args).await,
        Commands::Status(args) => commands::status::run(args).await,
        Commands::Config(args) => commands::config::run(args),
    }
}
