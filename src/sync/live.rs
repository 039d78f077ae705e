//! Live tailing of the chain head
//!
//! A head watcher polls the node and feeds two queues. The finalized consumer writes
//! finalized blocks and owns the shared [`Watermark`]. The new-head consumer writes
//! unfinalized blocks ahead of it. Both gap-fill from where they left off, so a missed
//! notification only delays a block.

use super::{BlockQueue, Indexer, SaveMode, SaveOutcome, Watermark};
use crate::chain::ChainClient;
use crate::metadata::is_fatal;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::{select, time};
use tracing::{debug, info, warn};

/// Push `head` if it is higher than anything seen on this queue before
fn observe(queue: &BlockQueue, last: &mut Option<u64>, head: u64) {
    if last.map_or(true, |prev| head > prev) {
        queue.push(head);
        *last = Some(head);
    }
}

/// Push the best head when it moves up or when its hash changes at any height
fn observe_best(queue: &BlockQueue, last: &mut Option<(u64, String)>, number: u64, hash: String) {
    let changed = match last {
        Some((prev, prev_hash)) => number > *prev || *prev_hash != hash,
        None => true,
    };
    if changed {
        queue.push(number);
        *last = Some((number, hash));
    }
}

/// Poll finalized and best heads forever, feeding the two queues
pub async fn watch_heads(
    client: &dyn ChainClient,
    finalized: &BlockQueue,
    new: &BlockQueue,
    poll_interval: Duration,
) {
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut last_finalized = None;
    let mut last_best = None;

    loop {
        interval.tick().await;
        match client.finalized_head().await {
            Ok(head) => observe(finalized, &mut last_finalized, head),
            Err(e) => warn!("Failed to get finalized head: {:#}", e),
        }
        let best = async {
            let number = client.best_head().await?;
            anyhow::Ok((number, client.block_hash(number).await?))
        };
        match best.await {
            Ok((number, hash)) => observe_best(new, &mut last_best, number, hash),
            Err(e) => warn!("Failed to get best head: {:#}", e),
        }
    }
}

/// Save `numbers` in order with `mode`, stopping at the first failure
///
/// Returns the last number saved. Only fatal errors are returned as `Err`.
async fn fill(
    indexer: &Indexer,
    numbers: std::ops::RangeInclusive<u64>,
    mode: SaveMode,
) -> Result<Option<u64>> {
    let mut last = None;
    for number in numbers {
        match indexer.save_block(number, mode).await {
            Ok(_) => last = Some(number),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!("Failed to save block {}: {:#}", number, e);
                break;
            }
        }
    }
    Ok(last)
}

/// Apply finalized head `number`, gap-filling from the watermark
pub async fn apply_finalized(indexer: &Indexer, number: u64, watermark: &Watermark) -> Result<()> {
    let mark = watermark.get();
    if number <= mark {
        fill(indexer, number..=number, SaveMode::Finalize).await?;
        return Ok(());
    }

    if number > mark + 1 {
        debug!("Finalized gap {}-{}", mark + 1, number);
    }
    for next in mark + 1..=number {
        match fill(indexer, next..=next, SaveMode::Finalize).await? {
            Some(n) => watermark.set(n),
            None => break,
        }
    }

    let tip = indexer.client().best_head().await.unwrap_or(number);
    if let Err(e) = indexer
        .db()
        .update_sync_status(watermark.get(), number, tip, false)
        .await
    {
        warn!("Failed to update sync status: {}", e);
    }
    Ok(())
}

/// Apply new head `number`, gap-filling from `cursor` or the watermark, whichever is higher
///
/// The stored unfinalized branch below the head is then re-checked block by block,
/// newest first, until a block matches the node again.
pub async fn apply_new(
    indexer: &Indexer,
    number: u64,
    cursor: &mut u64,
    watermark: &Watermark,
) -> Result<()> {
    let mark = watermark.get();
    let from = (*cursor).max(mark);
    if number > from {
        if let Some(last) = fill(indexer, from + 1..=number, SaveMode::New).await? {
            *cursor = last;
        }
    }

    let mut next = number.min(from);
    while next > mark {
        match indexer.save_block(next, SaveMode::New).await {
            Ok(SaveOutcome::Replaced) => {
                debug!("Replaced forked block {}", next);
                next -= 1;
            }
            Ok(_) => break,
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!("Failed to recheck block {}: {:#}", next, e);
                break;
            }
        }
    }
    Ok(())
}

async fn consume_finalized(indexer: &Indexer, queue: &BlockQueue, watermark: &Watermark) -> Result<()> {
    loop {
        match queue.pop() {
            Some(number) => {
                debug!("Finalized head {} ({} queued)", number, queue.len());
                apply_finalized(indexer, number, watermark).await?
            }
            None => time::sleep(indexer.options().queue_backoff).await,
        }
    }
}

async fn consume_new(indexer: &Indexer, queue: &BlockQueue, watermark: &Watermark) -> Result<()> {
    let mut cursor = watermark.get();
    loop {
        match queue.pop() {
            Some(number) => apply_new(indexer, number, &mut cursor, watermark).await?,
            None => time::sleep(indexer.options().queue_backoff).await,
        }
    }
}

/// Tail the chain until `shutdown` resolves or a fatal error occurs
pub async fn run<S>(indexer: &Indexer, watermark: Watermark, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let finalized = BlockQueue::new();
    let new = BlockQueue::new();

    info!(
        "Watching for new blocks from {} (poll interval: {:?})",
        watermark.get(),
        indexer.options().poll_interval
    );

    select! {
        _ = watch_heads(indexer.client(), &finalized, &new, indexer.options().poll_interval) => Ok(()),
        result = consume_finalized(indexer, &finalized, &watermark) => result,
        result = consume_new(indexer, &new, &watermark) => result,
        _ = shutdown => {
            info!("Stopped at finalized block {}", watermark.get());
            Ok(())
        }
    }
}
