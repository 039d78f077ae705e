//! Reindex command - redecode a single block and overwrite what is stored

use super::sync::open_indexer;
use crate::config::Config;
use crate::sync::{SaveMode, SaveOutcome};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ReindexArgs {
    /// Block number to redecode
    pub block: u64,

    /// Node RPC endpoint URL
    #[arg(short, long)]
    pub rpc_url: Option<String>,

    /// SQLite database path
    #[arg(short, long)]
    pub db_path: Option<PathBuf>,
}

pub async fn run(args: ReindexArgs) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = args.rpc_url {
        config.rpc.url = url;
    }
    if let Some(path) = args.db_path {
        config.database.path = path.display().to_string();
    }
    config.validate()?;

    let indexer = open_indexer(&config).await?;
    let outcome = indexer.save_block(args.block, SaveMode::Force).await?;
    match outcome {
        SaveOutcome::Replaced => info!("Block {} redecoded and replaced", args.block),
        _ => info!("Block {} decoded and stored", args.block),
    }

    let db = indexer.db();
    if let Some(block) = db.find_block(args.block).await? {
        println!("Block #{} {}", block.block_num, block.block_hash);
        println!("  Spec version: {}", block.spec_version);
        println!("  Validator:    {}", if block.validator.is_empty() { "-" } else { block.validator.as_str() });
        println!("  Extrinsics:   {}", block.extrinsics_count);
        println!("  Events:       {}", block.events_count);
        println!("  Transfers:    {}", db.transfers_for_block(args.block).await?.len());
    }
    Ok(())
}
