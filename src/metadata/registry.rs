//! Spec-version keyed cache of [`ChainVersion`]s with single-flight loading
//!
//! The first block of a new runtime triggers one metadata fetch. Concurrent decoders
//! hitting the same spec version wait on that load instead of issuing their own. A
//! waiter gives up after `wait` and takes over the load itself, so a stuck loader
//! cannot wedge the pool.

use super::ChainVersion;
use crate::chain::ChainClient;
use crate::db::Database;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Flight {
    done: Notify,
}

pub struct MetadataRegistry {
    versions: RwLock<HashMap<u32, Arc<ChainVersion>>>,
    loading: Mutex<HashMap<u32, Arc<Flight>>>,
    wait: Duration,
}

enum Role {
    Leader(Arc<Flight>),
    Follower(Arc<Flight>),
}

/// Clears the in-flight marker and wakes waiters, also on error or cancellation
struct FlightGuard<'a> {
    registry: &'a MetadataRegistry,
    spec_version: u32,
    flight: Arc<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.clear_flight(self.spec_version, &self.flight);
        self.flight.done.notify_waiters();
    }
}

impl MetadataRegistry {
    pub fn new(wait: Duration) -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// Load every persisted version into the cache
    pub async fn preload(&self, db: &Database) -> Result<usize> {
        let versions = db
            .all_chain_versions()
            .await
            .context("Failed to load persisted chain versions")?;
        let count = versions.len();
        for version in versions {
            self.insert(version);
        }
        if count > 0 {
            info!("Loaded {} chain versions from database", count);
        }
        Ok(count)
    }

    pub fn get(&self, spec_version: u32) -> Option<Arc<ChainVersion>> {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&spec_version)
            .cloned()
    }

    fn insert(&self, version: ChainVersion) -> Arc<ChainVersion> {
        let version = Arc::new(version);
        self.versions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(version.spec_version, Arc::clone(&version));
        version
    }

    fn join_or_lead(&self, spec_version: u32) -> Role {
        let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        match loading.get(&spec_version) {
            Some(flight) => Role::Follower(Arc::clone(flight)),
            None => {
                let flight = Arc::new(Flight::default());
                loading.insert(spec_version, Arc::clone(&flight));
                Role::Leader(flight)
            }
        }
    }

    fn is_current(&self, spec_version: u32, flight: &Arc<Flight>) -> bool {
        self.loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&spec_version)
            .map_or(false, |f| Arc::ptr_eq(f, flight))
    }

    /// Remove the marker only if it still belongs to `flight`
    fn clear_flight(&self, spec_version: u32, flight: &Arc<Flight>) {
        let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if loading
            .get(&spec_version)
            .map_or(false, |f| Arc::ptr_eq(f, flight))
        {
            loading.remove(&spec_version);
        }
    }

    /// Return the [`ChainVersion`] for `spec_version`, loading it at `block_hash` if needed
    pub async fn resolve(
        &self,
        client: &dyn ChainClient,
        db: &Database,
        block_hash: &str,
        spec_version: u32,
    ) -> Result<Arc<ChainVersion>> {
        loop {
            if let Some(version) = self.get(spec_version) {
                return Ok(version);
            }

            match self.join_or_lead(spec_version) {
                Role::Leader(flight) => {
                    let _guard = FlightGuard {
                        registry: self,
                        spec_version,
                        flight,
                    };
                    return self.load(client, db, block_hash, spec_version).await;
                }
                Role::Follower(flight) => {
                    let notified = flight.done.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    // The leader may have finished between the cache check and enable()
                    if self.get(spec_version).is_some() || !self.is_current(spec_version, &flight)
                    {
                        continue;
                    }

                    debug!("Waiting for metadata of spec version {}", spec_version);
                    if tokio::time::timeout(self.wait, notified).await.is_err() {
                        warn!(
                            "Metadata load for spec version {} exceeded {:?}, taking over",
                            spec_version, self.wait
                        );
                        self.clear_flight(spec_version, &flight);
                    }
                }
            }
        }
    }

    async fn load(
        &self,
        client: &dyn ChainClient,
        db: &Database,
        block_hash: &str,
        spec_version: u32,
    ) -> Result<Arc<ChainVersion>> {
        if let Some(stored) = db.find_chain_version(spec_version).await? {
            debug!("Adopted persisted chain version {}", spec_version);
            return Ok(self.insert(stored));
        }

        let raw = client
            .metadata(block_hash)
            .await
            .with_context(|| format!("Failed to fetch metadata at {}", block_hash))?;
        let previous = db.latest_chain_version_below(spec_version).await?;

        let version = ChainVersion::new(spec_version, raw, previous.as_ref())
            .with_context(|| format!("Failed to parse metadata for spec version {}", spec_version))?;
        let version = Arc::new(version);

        match db.create_chain_version(Arc::clone(&version)).await {
            Ok(()) => {
                info!(
                    "Registered spec version {} ({} modules, schema {})",
                    spec_version,
                    version.modules.len(),
                    version.metadata().schema()
                );
            }
            Err(e) if e.is_duplicate() => {
                // Another writer persisted it first; theirs is authoritative
                let stored = db
                    .find_chain_version(spec_version)
                    .await?
                    .with_context(|| format!("Chain version {} vanished after conflict", spec_version))?;
                return Ok(self.insert(stored));
            }
            Err(e) => return Err(e.into()),
        }

        self.versions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec_version, Arc::clone(&version));
        Ok(version)
    }
}
