//! Chain synchronization
//!
//! [`Indexer`] owns the write path from chain to store. `catch_up` backfills finalized
//! history window by window, repairing gaps left by earlier runs, and [`live`] keeps the
//! store at the chain head afterwards.

mod engine;
pub mod live;
mod queue;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Indexer, SaveMode, SaveOutcome};
pub use queue::BlockQueue;

use crate::decoder::DecodeOptions;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Blocks decoded in parallel during backfill
    pub concurrency: usize,
    /// Width of one backfill / gap repair window
    pub batch_size: u64,
    pub start_block: u64,
    pub poll_interval: Duration,
    /// Sleep of a live consumer whose queue is empty
    pub queue_backoff: Duration,
    pub block_timeout: Duration,
    pub decode: DecodeOptions,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            batch_size: 5_000,
            start_block: 0,
            poll_interval: Duration::from_millis(1_000),
            queue_backoff: Duration::from_millis(1_000),
            block_timeout: Duration::from_secs(90),
            decode: DecodeOptions::default(),
        }
    }
}

/// Highest block number known to be persisted as finalized, with everything below it
///
/// Advanced by backfill and by the finalized consumer only. Cloning shares the value.
#[derive(Debug, Clone, Default)]
pub struct Watermark(Arc<AtomicU64>);

impl Watermark {
    pub fn new(value: u64) -> Self {
        Self(Arc::new(AtomicU64::new(value)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }
}
