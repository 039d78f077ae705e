//! Scripted in-memory chain for engine and registry tests

use crate::chain::{ChainBlock, ChainClient, EventRecord, Extrinsic};
use crate::decoder::tests::{
    babe_pre_digest, event, header, success, timestamp_extrinsic, transfer_extrinsic,
};
use crate::metadata::fixtures::lookup_v14;
use crate::rpc::{BlockHeader, RuntimeVersion, SystemHealth};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const SPEC_VERSION: u32 = 20;

#[derive(Clone)]
struct MockBlock {
    hash: String,
    header: BlockHeader,
    extrinsics: Vec<Extrinsic>,
    events: Vec<EventRecord>,
    spec_version: u32,
    session: u32,
}

struct ChainState {
    blocks: BTreeMap<u64, MockBlock>,
    forks: HashMap<u64, u64>,
    finalized: u64,
    syncing: bool,
    metadata: Value,
    metadata_delay: Duration,
    validators: Vec<String>,
    failing: HashSet<u64>,
    flaky: HashMap<u64, usize>,
    health_failures: usize,
    fetches: HashMap<u64, usize>,
}

pub struct MockChain {
    state: Mutex<ChainState>,
    pub metadata_calls: AtomicUsize,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                blocks: BTreeMap::new(),
                forks: HashMap::new(),
                finalized: 0,
                syncing: false,
                metadata: lookup_v14(),
                metadata_delay: Duration::ZERO,
                validators: vec!["5Val0".into(), "5Val1".into(), "5Val2".into()],
                failing: HashSet::new(),
                flaky: HashMap::new(),
                health_failures: 0,
                fetches: HashMap::new(),
            }),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    fn block_hash_for(number: u64, fork: u64) -> String {
        format!("0x{:060x}{:04x}", number, fork)
    }

    fn build(state: &ChainState, number: u64) -> MockBlock {
        let fork = state.forks.get(&number).copied().unwrap_or(0);
        let parent = if number == 0 {
            "0x00".to_string()
        } else {
            state
                .blocks
                .get(&(number - 1))
                .map(|b| b.hash.clone())
                .unwrap_or_else(|| Self::block_hash_for(number - 1, 0))
        };
        MockBlock {
            hash: Self::block_hash_for(number, fork),
            header: header(number, &parent, vec![babe_pre_digest((number % 3) as u32, number)]),
            extrinsics: vec![timestamp_extrinsic(1_600_000_000_000 + number * 6_000)],
            events: vec![success(0)],
            spec_version: SPEC_VERSION,
            session: (number / 100) as u32,
        }
    }

    /// Produce canonical blocks up to and including `number`
    pub fn extend_to(&self, number: u64) {
        let mut state = self.state();
        let from = state.blocks.keys().next_back().map_or(0, |n| n + 1);
        for n in from..=number {
            let block = Self::build(&state, n);
            state.blocks.insert(n, block);
        }
    }

    pub fn finalize(&self, number: u64) {
        self.state().finalized = number;
    }

    /// Replace block `number` with a sibling carrying a different hash
    pub fn reorg(&self, number: u64) -> String {
        let mut state = self.state();
        *state.forks.entry(number).or_insert(0) += 1;
        let mut block = Self::build(&state, number);
        if let Some(old) = state.blocks.get(&number) {
            block.extrinsics = old.extrinsics.clone();
            block.events = old.events.clone();
        }
        let hash = block.hash.clone();
        state.blocks.insert(number, block);
        hash
    }

    /// Append a signed `balances.transfer` with its events to block `number`
    pub fn add_transfer(&self, number: u64, to: &str, amount: &str) {
        let mut state = self.state();
        let Some(block) = state.blocks.get_mut(&number) else {
            return;
        };
        let idx = block.extrinsics.len() as u32;
        block
            .extrinsics
            .push(transfer_extrinsic("transfer", to, amount, number));
        block.events.push(event(
            json!({"ApplyExtrinsic": idx}),
            "balances",
            "Transfer",
            json!([
                {"name": "to", "type": "AccountId32", "typeAlias": "T::AccountId", "value": to},
                {"name": "amount", "type": "u128", "typeAlias": "T::Balance", "value": amount}
            ]),
        ));
        block.events.push(success(idx));
    }

    pub fn set_metadata(&self, metadata: Value) {
        self.state().metadata = metadata;
    }

    pub fn set_metadata_delay(&self, delay: Duration) {
        self.state().metadata_delay = delay;
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.state().syncing = syncing;
    }

    pub fn set_failing(&self, number: u64, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(number);
        } else {
            state.failing.remove(&number);
        }
    }

    /// Fail the next `times` body fetches of block `number`
    pub fn set_flaky(&self, number: u64, times: usize) {
        self.state().flaky.insert(number, times);
    }

    /// Fail the next `times` health queries
    pub fn fail_health(&self, times: usize) {
        self.state().health_failures = times;
    }

    pub fn hash_of(&self, number: u64) -> String {
        self.state()
            .blocks
            .get(&number)
            .map(|b| b.hash.clone())
            .unwrap_or_default()
    }

    /// How many times the full block body of `number` was fetched
    pub fn fetches(&self, number: u64) -> usize {
        self.state().fetches.get(&number).copied().unwrap_or(0)
    }

    fn by_hash(&self, hash: &str) -> Result<MockBlock> {
        self.state()
            .blocks
            .values()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown block hash {}", hash))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn finalized_head(&self) -> Result<u64> {
        Ok(self.state().finalized)
    }

    async fn best_head(&self) -> Result<u64> {
        Ok(self.state().blocks.keys().next_back().copied().unwrap_or(0))
    }

    async fn block_hash(&self, number: u64) -> Result<String> {
        self.state()
            .blocks
            .get(&number)
            .map(|b| b.hash.clone())
            .ok_or_else(|| anyhow!("Block {} is not known to the node", number))
    }

    async fn header(&self, hash: &str) -> Result<BlockHeader> {
        Ok(self.by_hash(hash)?.header)
    }

    async fn block(&self, hash: &str) -> Result<ChainBlock> {
        let block = self.by_hash(hash)?;
        let number = block.header.block_number();
        {
            let mut state = self.state();
            *state.fetches.entry(number).or_insert(0) += 1;
            if state.failing.contains(&number) {
                return Err(anyhow!("Injected failure for block {}", number));
            }
            if let Some(left) = state.flaky.get_mut(&number).filter(|left| **left > 0) {
                *left -= 1;
                return Err(anyhow!("Transient failure for block {}", number));
            }
        }
        Ok(ChainBlock {
            hash: block.hash,
            header: block.header,
            extrinsics: block.extrinsics,
        })
    }

    async fn runtime_version(&self, hash: &str) -> Result<RuntimeVersion> {
        Ok(RuntimeVersion {
            spec_name: "mock".into(),
            spec_version: self.by_hash(hash)?.spec_version,
            transaction_version: 1,
        })
    }

    async fn metadata(&self, _hash: &str) -> Result<Value> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let (metadata, delay) = {
            let state = self.state();
            (state.metadata.clone(), state.metadata_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(metadata)
    }

    async fn events(&self, hash: &str) -> Result<Vec<EventRecord>> {
        Ok(self.by_hash(hash)?.events)
    }

    async fn session_index(&self, hash: &str) -> Result<u32> {
        Ok(self.by_hash(hash)?.session)
    }

    async fn validators(&self, _hash: &str) -> Result<Vec<String>> {
        Ok(self.state().validators.clone())
    }

    async fn estimate_fee(&self, _extrinsic_hex: &str, _hash: &str) -> Result<u128> {
        Ok(1_000)
    }

    async fn health(&self) -> Result<SystemHealth> {
        let mut state = self.state();
        if state.health_failures > 0 {
            state.health_failures -= 1;
            return Err(anyhow!("RPC timeout"));
        }
        Ok(SystemHealth {
            peers: 1,
            is_syncing: state.syncing,
            should_have_peers: true,
        })
    }
}
