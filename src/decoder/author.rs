use super::digest::{author_claim, AuthorClaim};
use crate::chain::ChainClient;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Block author from the pre-runtime digest and the session's validator set
pub fn resolve_author(logs: &[String], validators: &[String]) -> Option<String> {
    if validators.is_empty() {
        return None;
    }
    let index = match author_claim(logs)? {
        AuthorClaim::Babe { authority_index } => authority_index as usize,
        AuthorClaim::Aura { slot } => (slot % validators.len() as u64) as usize,
    };
    validators.get(index).cloned()
}

/// Session validator sets keyed by session index
///
/// Only the most recent sessions are kept: an entry more than `depth` sessions older
/// than the newest cached session is evicted on insert.
pub struct SessionCache {
    depth: u32,
    sessions: Mutex<BTreeMap<u32, Arc<Vec<String>>>>,
}

impl SessionCache {
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, session_index: u32) -> Option<Arc<Vec<String>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_index)
            .cloned()
    }

    pub fn insert(&self, session_index: u32, validators: Vec<String>) -> Arc<Vec<String>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let validators = Arc::clone(
            sessions
                .entry(session_index)
                .or_insert_with(|| Arc::new(validators)),
        );

        let newest = sessions.keys().next_back().copied();
        if let Some(newest) = newest {
            let depth = self.depth;
            sessions.retain(|&idx, _| newest - idx <= depth);
        }
        validators
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Validators of `session_index`, queried at `block_hash` on a miss
    pub async fn validators(
        &self,
        client: &dyn ChainClient,
        block_hash: &str,
        session_index: u32,
    ) -> Result<Arc<Vec<String>>> {
        if let Some(cached) = self.get(session_index) {
            return Ok(cached);
        }
        let validators = client
            .validators(block_hash)
            .await
            .with_context(|| format!("Failed to fetch validators for session {}", session_index))?;
        let validators = self.insert(session_index, validators);
        debug!(
            "Cached {} validators for session {} ({} sessions held)",
            validators.len(),
            session_index,
            self.len()
        );
        Ok(validators)
    }
}
