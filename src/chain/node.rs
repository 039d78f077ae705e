//! JSON-RPC backed chain client
//!
//! Plain node queries go to the node endpoint using the standard Substrate RPC methods.
//! Decoded views come from the decoding gateway, which exposes the same block-hash keyed
//! queries under the `decoder_` namespace and answers with already-decoded JSON.

use super::{ChainBlock, ChainClient, EventRecord, Extrinsic};
use crate::rpc::{BlockHeader, FeeDetails, RpcClient, RuntimeVersion, SignedBlock, SystemHealth};
use anyhow::{Context, Result};
use async_trait::async_trait;

#[derive(Clone)]
pub struct NodeClient {
    node: RpcClient,
    decoder: RpcClient,
}

impl NodeClient {
    pub fn new(node: RpcClient, decoder: RpcClient) -> Self {
        Self { node, decoder }
    }

    pub fn endpoint(&self) -> &str {
        self.node.endpoint()
    }
}

#[async_trait]
impl ChainClient for NodeClient {
    async fn finalized_head(&self) -> Result<u64> {
        let hash: String = self
            .node
            .call("chain_getFinalizedHead", Vec::<()>::new())
            .await?;
        let header = self.header(&hash).await?;
        Ok(header.block_number())
    }

    async fn best_head(&self) -> Result<u64> {
        let header: BlockHeader = self.node.call("chain_getHeader", Vec::<()>::new()).await?;
        Ok(header.block_number())
    }

    async fn block_hash(&self, number: u64) -> Result<String> {
        let hash: Option<String> = self.node.call("chain_getBlockHash", vec![number]).await?;
        hash.with_context(|| format!("Block {} is not known to the node", number))
    }

    async fn header(&self, hash: &str) -> Result<BlockHeader> {
        self.node.call("chain_getHeader", vec![hash]).await
    }

    async fn block(&self, hash: &str) -> Result<ChainBlock> {
        let (signed, extrinsics) = tokio::try_join!(
            self.node.call::<_, SignedBlock>("chain_getBlock", vec![hash]),
            self.decoder
                .call::<_, Vec<Extrinsic>>("decoder_extrinsics", vec![hash]),
        )?;

        if signed.block.extrinsics.len() != extrinsics.len() {
            anyhow::bail!(
                "Decoder returned {} extrinsics for block {}, node has {}",
                extrinsics.len(),
                hash,
                signed.block.extrinsics.len()
            );
        }

        Ok(ChainBlock {
            hash: hash.to_string(),
            header: signed.block.header,
            extrinsics,
        })
    }

    async fn runtime_version(&self, hash: &str) -> Result<RuntimeVersion> {
        self.node.call("state_getRuntimeVersion", vec![hash]).await
    }

    async fn metadata(&self, hash: &str) -> Result<serde_json::Value> {
        self.decoder.call("decoder_metadata", vec![hash]).await
    }

    async fn events(&self, hash: &str) -> Result<Vec<EventRecord>> {
        self.decoder.call("decoder_events", vec![hash]).await
    }

    async fn session_index(&self, hash: &str) -> Result<u32> {
        self.decoder.call("decoder_sessionIndex", vec![hash]).await
    }

    async fn validators(&self, hash: &str) -> Result<Vec<String>> {
        self.decoder.call("decoder_sessionValidators", vec![hash]).await
    }

    async fn estimate_fee(&self, extrinsic_hex: &str, hash: &str) -> Result<u128> {
        let details: FeeDetails = self
            .node
            .call("payment_queryInfo", vec![extrinsic_hex, hash])
            .await?;
        Ok(details.partial_fee)
    }

    async fn health(&self) -> Result<SystemHealth> {
        self.node.call("system_health", Vec::<()>::new()).await
    }
}
