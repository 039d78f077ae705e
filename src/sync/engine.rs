use super::{SyncOptions, Watermark};
use crate::chain::ChainClient;
use crate::db::Database;
use crate::decoder::{decode_block, FetchedBlock, SessionCache};
use crate::metadata::{self, MetadataRegistry};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use futures::{stream, TryStreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

/// Passes over one backfill window before its failures are left to the live path
const WINDOW_ATTEMPTS: usize = 3;

/// How an incoming block relates to what may already be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Unfinalized head: write when absent or when the stored hash differs
    New,
    /// Backfill: no existence check, a duplicate key means already applied
    Sync,
    /// Finalized head: promote a matching row, replace a mismatching one
    Finalize,
    /// Always redecode and overwrite
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Replaced,
    Finalized,
    Unchanged,
}

pub struct Indexer {
    client: Arc<dyn ChainClient>,
    db: Database,
    registry: Arc<MetadataRegistry>,
    sessions: SessionCache,
    options: SyncOptions,
}

impl Indexer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        db: Database,
        registry: Arc<MetadataRegistry>,
        sessions: SessionCache,
        options: SyncOptions,
    ) -> Self {
        Self {
            client,
            db,
            registry,
            sessions,
            options,
        }
    }

    pub fn client(&self) -> &dyn ChainClient {
        self.client.as_ref()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Fetch, decode and commit block `number` according to `mode`
    pub async fn save_block(&self, number: u64, mode: SaveMode) -> Result<SaveOutcome> {
        let hash = self
            .client
            .block_hash(number)
            .await
            .with_context(|| format!("Failed to get hash for block {}", number))?;

        let mut replacing = false;
        match mode {
            SaveMode::Sync => {}
            SaveMode::Force => {
                replacing = self.db.delete_block_cascade(number).await?;
            }
            SaveMode::New | SaveMode::Finalize => {
                if let Some(stored) = self.db.find_block(number).await? {
                    if stored.block_hash == hash {
                        if mode == SaveMode::Finalize && !stored.finalized {
                            self.db.update_finalized(number).await?;
                            info!("FinalizeBlock {} {}", number, hash);
                            return Ok(SaveOutcome::Finalized);
                        }
                        debug!("Block {} already stored", number);
                        return Ok(SaveOutcome::Unchanged);
                    }
                    debug!(
                        "Block {} changed from {} to {}, replacing",
                        number, stored.block_hash, hash
                    );
                    self.db.delete_block_cascade(number).await?;
                    replacing = true;
                }
            }
        }

        let finalized = mode != SaveMode::New;
        let fetched = self
            .fetch(&hash, finalized)
            .await
            .with_context(|| format!("Failed to fetch block {}", number))?;
        let version = self
            .registry
            .resolve(self.client(), &self.db, &hash, fetched.spec_version)
            .await?;
        let unit = decode_block(&fetched, &version, &self.options.decode)
            .with_context(|| format!("Failed to decode block {}", number))?;

        match self.db.commit_block(unit).await {
            Ok(()) => {}
            Err(e) if e.is_duplicate() => {
                // Another consumer committed this number in the meantime
                debug!("Block {} committed concurrently", number);
                if finalized {
                    if let Some(stored) = self.db.find_block(number).await? {
                        if stored.block_hash == hash && !stored.finalized {
                            self.db.update_finalized(number).await?;
                            info!("FinalizeBlock {} {}", number, hash);
                            return Ok(SaveOutcome::Finalized);
                        }
                    }
                }
                return Ok(SaveOutcome::Unchanged);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to store block {}", number));
            }
        }

        if replacing {
            info!("UpdateBlock {} {}", number, hash);
            Ok(SaveOutcome::Replaced)
        } else {
            info!("CreateBlock {} {}", number, hash);
            Ok(SaveOutcome::Created)
        }
    }

    async fn fetch(&self, hash: &str, finalized: bool) -> Result<FetchedBlock> {
        let client = self.client();
        let (block, events, runtime, session_index) = tokio::try_join!(
            client.block(hash),
            client.events(hash),
            client.runtime_version(hash),
            client.session_index(hash),
        )?;
        let validators = self
            .sessions
            .validators(client, hash, session_index)
            .await?;

        let fees = try_join_all(block.extrinsics.iter().map(|ex| async move {
            if ex.is_signed() {
                client.estimate_fee(&ex.hex, hash).await
            } else {
                Ok(0)
            }
        }))
        .await?;

        Ok(FetchedBlock {
            block,
            events,
            fees,
            spec_version: runtime.spec_version,
            validators,
            finalized,
        })
    }

    /// Scan `[from, to]` against the store: drop unfinalized rows and return every
    /// number that still needs a finalized block
    pub async fn gap_repair_window(&self, from: u64, to: u64) -> Result<Vec<u64>> {
        let finalized: HashSet<u64> = self
            .db
            .finalized_block_numbers(from, to)
            .await?
            .into_iter()
            .collect();

        let stale = self.db.unfinalized_block_numbers(from, to).await?;
        if !stale.is_empty() {
            let removed = self.db.delete_blocks(stale).await?;
            debug!("Removed {} unfinalized blocks in {}-{}", removed, from, to);
        }

        Ok((from..=to).filter(|n| !finalized.contains(n)).collect())
    }

    /// Save `numbers` as finalized blocks through the bounded pool
    ///
    /// A block that fails or times out is logged and returned, lowest first. Only a
    /// fatal metadata error aborts the batch.
    pub async fn backfill(&self, numbers: Vec<u64>) -> Result<Vec<u64>> {
        let failed = Mutex::new(Vec::new());
        let block_timeout = self.options.block_timeout;

        stream::iter(numbers.into_iter().map(Ok::<u64, anyhow::Error>))
            .try_for_each_concurrent(self.options.concurrency.max(1), |number| {
                let failed = &failed;
                async move {
                    match time::timeout(block_timeout, self.save_block(number, SaveMode::Sync)).await
                    {
                        Ok(Ok(_)) => return Ok(()),
                        Ok(Err(e)) if metadata::is_fatal(&e) => return Err(e),
                        Ok(Err(e)) => warn!("Failed to sync block {}: {:#}", number, e),
                        Err(_) => warn!("Block {} timed out after {:?}", number, block_timeout),
                    }
                    failed.lock().await.push(number);
                    Ok(())
                }
            })
            .await?;

        let mut failed = failed.into_inner();
        failed.sort_unstable();
        Ok(failed)
    }

    /// Repair and backfill `[from, to]`, giving failed blocks a few more attempts
    ///
    /// Returns the numbers still missing, lowest first.
    async fn sync_window(&self, from: u64, to: u64, head: u64) -> Result<Vec<u64>> {
        let mut failed = Vec::new();
        for attempt in 1..=WINDOW_ATTEMPTS {
            let missing = self
                .retry("scan stored blocks", move || self.gap_repair_window(from, to))
                .await;
            if missing.is_empty() {
                return Ok(Vec::new());
            }

            let wanted = missing.len();
            failed = self.backfill(missing).await?;
            let progress = if head > 0 { to as f64 / head as f64 * 100.0 } else { 100.0 };
            info!(
                "Synced blocks {}-{} ({}/{} saved) - Progress: {:.1}%",
                from,
                to,
                wanted - failed.len(),
                wanted,
                progress
            );
            if failed.is_empty() {
                break;
            }
            if attempt < WINDOW_ATTEMPTS {
                debug!("Retrying {} failed blocks in {}-{}", failed.len(), from, to);
            }
        }
        Ok(failed)
    }

    /// Run `op` until it succeeds, sleeping `poll_interval` between attempts
    async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match op().await {
                Ok(value) => return value,
                Err(e) => {
                    warn!("Failed to {}: {:#}", what, e);
                    time::sleep(self.options.poll_interval).await;
                }
            }
        }
    }

    async fn record_status(&self, synced: u64, head: u64, syncing: bool) {
        let tip = self.client.best_head().await.unwrap_or(head);
        self.retry("update sync status", move || async move {
            Ok::<_, anyhow::Error>(self.db.update_sync_status(synced, head, tip, syncing).await?)
        })
        .await
    }

    /// Bring the store up to the finalized head, window by window from `start_block`
    ///
    /// Returns once the finalized head stops moving and the node no longer reports
    /// major syncing. Node and store errors are retried; only a fatal metadata error
    /// is returned. `watermark` stops below the first block that could not be saved,
    /// so the finalized consumer fills it later.
    pub async fn catch_up(&self, watermark: &Watermark) -> Result<u64> {
        let batch_size = self.options.batch_size.max(1);
        let mut cursor = self.options.start_block;
        let mut head = self
            .retry("get finalized head", move || self.client.finalized_head())
            .await;
        let mut hole: Option<u64> = None;

        info!("Catching up from block {} to finalized block {}", cursor, head);

        loop {
            while cursor <= head {
                let end = (cursor + batch_size - 1).min(head);
                let failed = self.sync_window(cursor, end, head).await?;
                if let (None, Some(&first)) = (hole, failed.first()) {
                    warn!(
                        "{} blocks in {}-{} still missing, holding watermark below {}",
                        failed.len(),
                        cursor,
                        end,
                        first
                    );
                    hole = Some(first);
                }

                watermark.set(hole.map_or(end, |first| first.saturating_sub(1)));
                self.record_status(watermark.get(), head, true).await;
                cursor = end + 1;
            }

            let latest = self
                .retry("get finalized head", move || self.client.finalized_head())
                .await;
            let syncing = self
                .retry("get node health", move || self.client.health())
                .await
                .is_syncing;
            if latest > head {
                head = latest;
                continue;
            }
            if !syncing {
                break;
            }
            debug!("Node is still syncing, waiting for finalized head to advance");
            time::sleep(self.options.poll_interval).await;
        }

        self.record_status(watermark.get(), head, false).await;
        info!("Initial sync complete at finalized block {}", head);
        Ok(watermark.get())
    }
}
