//! Status command - show indexing progress and stored block details

use crate::chain::{ChainClient, NodeClient};
use crate::config::Config;
use crate::db::Database;
use crate::rpc::RpcClient;
use crate::types::KIND_TRANSFER;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

/// Status command arguments
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// SQLite database path
    #[arg(short, long)]
    pub db_path: Option<PathBuf>,

    /// Show the stored contents of one block
    #[arg(short, long)]
    pub block: Option<u64>,

    /// Print a stored blob as hex, by its sha256 hash
    #[arg(long, conflicts_with = "block")]
    pub blob: Option<String>,

    /// Skip querying the node
    #[arg(long)]
    pub offline: bool,
}

fn format_time(unix: i64) -> String {
    Utc.timestamp_opt(unix, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(path) = args.db_path {
        config.database.path = path.display().to_string();
    }
    let db_path = PathBuf::from(&config.database.path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    if let Some(hash) = args.blob {
        let hash = hash.trim_start_matches("0x").to_lowercase();
        match db.get_blob(hash.clone()).await? {
            Some(data) => println!("0x{}", hex::encode(data)),
            None => warn!("Blob {} is not in the database", hash),
        }
        return Ok(());
    }

    match args.block {
        Some(number) => show_block(&db, number).await,
        None => {
            show_summary(&db).await?;
            if !args.offline {
                let client = NodeClient::new(
                    RpcClient::with_timeout(&config.rpc.url, config.rpc.timeout_ms),
                    RpcClient::with_timeout(config.rpc.decoder_url(), config.rpc.timeout_ms),
                );
                show_node(&client, &db).await;
            }
            Ok(())
        }
    }
}

async fn show_summary(db: &Database) -> Result<()> {
    let counts = db.counts().await?;
    let status = db.get_sync_status().await?;

    info!("Database Statistics");
    info!("─────────────────────────────────────────");
    info!("Blocks:           {} ({} finalized)", counts.blocks, counts.finalized_blocks);
    info!("Extrinsics:       {}", counts.extrinsics);
    info!("Events:           {}", counts.events);
    info!("Transfers:        {}", counts.transfers);
    info!("Logs:             {}", counts.logs);
    info!("Runtime versions: {}", counts.chain_versions);
    info!("Blobs:            {}", counts.blobs);
    info!("─────────────────────────────────────────");
    info!("Last synced:      #{}", status.last_synced_block);
    info!("Last finalized:   #{}", status.last_finalized_block);
    info!("Chain tip:        #{}", status.chain_tip_block);
    info!(
        "State:            {} (updated {})",
        if status.is_syncing { "catching up" } else { "live" },
        format_time(status.last_updated)
    );

    if let Some(block) = db.latest_block().await? {
        info!("Highest stored:   #{} {}", block.block_num, block.block_hash);
    }
    if let Some(latest) = db.latest_chain_version().await? {
        info!(
            "Latest runtime:   spec {} ({} modules)",
            latest.spec_version,
            latest.modules.len()
        );
    }
    Ok(())
}

async fn show_node(client: &dyn ChainClient, db: &Database) {
    let heads = tokio::try_join!(client.finalized_head(), client.best_head(), client.health());
    match heads {
        Ok((finalized, best, health)) => {
            info!("─────────────────────────────────────────");
            info!(
                "Node: block {} | finalized {} | peers {} | syncing {}",
                best, finalized, health.peers, health.is_syncing
            );
            if let Ok(status) = db.get_sync_status().await {
                let behind = finalized.saturating_sub(status.last_synced_block);
                if behind > 0 {
                    warn!("Index is {} finalized blocks behind the node", behind);
                }
            }
        }
        Err(e) => warn!("Could not query node: {:#}", e),
    }
}

async fn show_block(db: &Database, number: u64) -> Result<()> {
    let Some(block) = db.find_block(number).await? else {
        warn!("Block {} is not in the database", number);
        return Ok(());
    };

    println!("Block #{} {}", block.block_num, block.block_hash);
    println!("  Parent:     {}", block.parent_hash);
    println!("  Time:       {}", format_time(block.block_at));
    println!("  Finalized:  {}", block.finalized);
    println!("  Spec:       {}", block.spec_version);
    println!(
        "  Validator:  {}",
        if block.validator.is_empty() { "-" } else { block.validator.as_str() }
    );

    println!("\nExtrinsics ({}):", block.extrinsics_count);
    for ex in db.extrinsics_for_block(number).await? {
        let status = if ex.success { "ok" } else { "failed" };
        println!(
            "  {} {}.{} [{}]{}",
            ex.extrinsic_id,
            ex.section,
            ex.method,
            status,
            if ex.kind == KIND_TRANSFER { " transfer" } else { "" }
        );
        if ex.is_signed {
            println!("      signer {} nonce {} fee {} tip {}", ex.account_id, ex.nonce, ex.fee, ex.tip);
        }
        if ex.calls.len() > 1 {
            println!("      calls {}", ex.calls.join(", "));
        }
        if let Some(err) = &ex.error {
            println!("      error {}.{} {}", err.module, err.name, err.message);
        }
    }

    println!("\nEvents ({}):", block.events_count);
    for ev in db.events_for_block(number).await? {
        println!(
            "  {} {}.{} ({})",
            ev.event_id,
            ev.section,
            ev.method,
            ev.extrinsic_id.as_deref().unwrap_or("block")
        );
    }

    for tr in db.transfers_for_block(number).await? {
        println!("\nTransfer {}: {} -> {} amount {}", tr.extrinsic_id, tr.from, tr.to, tr.amount);
    }

    println!("\nLogs:");
    for log in db.logs_for_block(number).await? {
        println!("  {} {} {}", log.log_id, log.log_type, log.data);
    }
    Ok(())
}
