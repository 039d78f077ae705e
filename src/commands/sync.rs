//! Sync command - index the chain into the local database

use crate::chain::{ChainClient, NodeClient};
use crate::config::Config;
use crate::db::Database;
use crate::decoder::SessionCache;
use crate::metadata::MetadataRegistry;
use crate::rpc::RpcClient;
use crate::sync::{live, Indexer, Watermark};
use anyhow::{Context, Result};
use clap::Args;
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::select;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Sync command arguments
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Node RPC endpoint URL
    #[arg(short, long)]
    pub rpc_url: Option<String>,

    /// Decoding gateway URL
    #[arg(long)]
    pub decoder_url: Option<String>,

    /// SQLite database path
    #[arg(short, long)]
    pub db_path: Option<PathBuf>,

    /// Block number to start the initial scan from
    #[arg(short, long)]
    pub start_block: Option<u64>,

    /// Blocks per backfill window
    #[arg(short, long)]
    pub batch_size: Option<u64>,

    /// Blocks decoded in parallel during backfill
    #[arg(short, long)]
    pub concurrency: Option<usize>,
}

impl SyncArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.rpc_url {
            config.rpc.url = url.clone();
        }
        if let Some(url) = &self.decoder_url {
            config.rpc.decoder_url = Some(url.clone());
        }
        if let Some(path) = &self.db_path {
            config.database.path = path.display().to_string();
        }
        if let Some(start) = self.start_block {
            config.sync.start_block = start;
        }
        if let Some(size) = self.batch_size {
            config.sync.batch_size = size;
        }
        if let Some(concurrency) = self.concurrency {
            config.sync.concurrency = concurrency;
        }
    }
}

/// Wire the chain client, store and registry described by `config`
pub(crate) async fn open_indexer(config: &Config) -> Result<Indexer> {
    let retry = config.rpc.retry_config();
    let node = RpcClient::with_timeout(&config.rpc.url, config.rpc.timeout_ms).with_retry(retry.clone());
    let decoder =
        RpcClient::with_timeout(config.rpc.decoder_url(), config.rpc.timeout_ms).with_retry(retry);
    let node_client = NodeClient::new(node, decoder);
    debug!("Chain client for {}", node_client.endpoint());
    let client: Arc<dyn ChainClient> = Arc::new(node_client);

    let db_path = PathBuf::from(&config.database.path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database: {}", db_path.display());

    let registry = Arc::new(MetadataRegistry::new(config.sync.metadata_wait()));
    registry.preload(&db).await?;

    Ok(Indexer::new(
        client,
        db,
        registry,
        SessionCache::new(config.sync.session_cache_depth),
        config.sync.sync_options(),
    ))
}

/// Run the sync command
pub async fn run(args: SyncArgs) -> Result<()> {
    let mut config = Config::load()?;
    args.apply(&mut config);
    config.validate()?;

    info!("Starting block synchronization");
    info!("RPC endpoint: {}", config.rpc.url);
    if config.rpc.decoder_url() != config.rpc.url {
        info!("Decoder endpoint: {}", config.rpc.decoder_url());
    }

    // Set up signal handling for graceful shutdown
    let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT])
        .context("Failed to register signal handlers")?;
    let handle = signals.handle();
    let mut signals = signals.fuse();

    let indexer = open_indexer(&config).await?;
    let watermark = Watermark::default();

    let interrupted = select! {
        result = indexer.catch_up(&watermark) => {
            result?;
            false
        }
        Some(signal) = signals.next() => {
            info!("Received signal {} during initial sync, shutting down", signal);
            true
        }
    };

    if !interrupted {
        let shutdown = async {
            while let Some(signal) = signals.next().await {
                match signal {
                    SIGTERM | SIGINT | SIGQUIT => {
                        info!("Received signal {}, initiating graceful shutdown...", signal);
                        return;
                    }
                    _ => debug!("Received unexpected signal {}", signal),
                }
            }
        };
        live::run(&indexer, watermark.clone(), shutdown).await?;
    }

    handle.close();
    info!("Shutting down gracefully...");
    info!("Final sync status: finalized up to block {}", watermark.get());
    Ok(())
}
