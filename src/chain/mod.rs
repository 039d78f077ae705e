//! Chain client boundary
//!
//! The scanner never decodes SCALE payloads itself. Everything it needs from the chain
//! goes through [`ChainClient`]: raw node queries (heads, hashes, runtime version,
//! health, fee estimates) and decoded views (extrinsics, events, metadata, session
//! validators) keyed by block hash.

mod node;
mod types;

pub use node::NodeClient;
pub use types::*;

use crate::rpc::{BlockHeader, RuntimeVersion, SystemHealth};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Number of the latest finalized block
    async fn finalized_head(&self) -> Result<u64>;

    /// Number of the current best (possibly unfinalized) block
    async fn best_head(&self) -> Result<u64>;

    async fn block_hash(&self, number: u64) -> Result<String>;

    async fn header(&self, hash: &str) -> Result<BlockHeader>;

    /// Header plus decoded extrinsics
    async fn block(&self, hash: &str) -> Result<ChainBlock>;

    async fn runtime_version(&self, hash: &str) -> Result<RuntimeVersion>;

    /// Runtime metadata in human-readable form, tagged by schema version (`{"V14": {...}}`)
    async fn metadata(&self, hash: &str) -> Result<serde_json::Value>;

    async fn events(&self, hash: &str) -> Result<Vec<EventRecord>>;

    async fn session_index(&self, hash: &str) -> Result<u32>;

    /// Session validator account ids in authority order
    async fn validators(&self, hash: &str) -> Result<Vec<String>>;

    /// Partial fee for a signed extrinsic, evaluated at `hash`
    async fn estimate_fee(&self, extrinsic_hex: &str, hash: &str) -> Result<u128>;

    async fn health(&self) -> Result<SystemHealth>;
}
