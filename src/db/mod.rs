mod blocks;
mod schema;
mod versions;

pub use blocks::{SyncStatusRecord, TableCounts};
pub use schema::{init_schema, run_migrations};

#[cfg(test)]
pub(crate) use blocks::tests::sample_unit;

use crate::metadata::ChainVersion;
use crate::types::{
    BlockRecord, DecodedUnit, EventEntry, ExtrinsicRecord, LogRecord, TransferRecord,
};
use anyhow::Context;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Primary or unique key conflict. Callers treat this as "already applied".
    #[error("Duplicate row: {0}")]
    Duplicate(String),

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Stored row is inconsistent: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == ErrorCode::ConstraintViolation
                    && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) =>
            {
                StoreError::Duplicate(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Shared handle to the scanner database
///
/// Cheap to clone. Every operation runs on tokio's blocking pool so a slow write only
/// suspends the task that issued it.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the specified path
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // WAL lets readers (status command) run next to the scanner
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        Self::prepare(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> anyhow::Result<Self> {
        init_schema(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await?
    }

    // Block operations
    pub async fn find_block(&self, block_num: u64) -> StoreResult<Option<BlockRecord>> {
        self.run(move |conn| blocks::find_block(conn, block_num)).await
    }

    pub async fn latest_block(&self) -> StoreResult<Option<BlockRecord>> {
        self.run(|conn| blocks::latest_block(conn)).await
    }

    /// Write a block and all its children in one transaction
    ///
    /// Fails with [`StoreError::Duplicate`] if the block number is already present.
    pub async fn commit_block(&self, unit: DecodedUnit) -> StoreResult<()> {
        self.run(move |conn| blocks::commit_block(conn, &unit)).await
    }

    /// Flip a block and its extrinsics to finalized
    pub async fn update_finalized(&self, block_num: u64) -> StoreResult<bool> {
        self.run(move |conn| blocks::update_finalized(conn, block_num)).await
    }

    pub async fn delete_block_cascade(&self, block_num: u64) -> StoreResult<bool> {
        self.run(move |conn| blocks::delete_blocks(conn, &[block_num]).map(|n| n > 0))
            .await
    }

    pub async fn delete_blocks(&self, numbers: Vec<u64>) -> StoreResult<usize> {
        self.run(move |conn| blocks::delete_blocks(conn, &numbers)).await
    }

    pub async fn finalized_block_numbers(&self, from: u64, to: u64) -> StoreResult<Vec<u64>> {
        self.run(move |conn| blocks::block_numbers_in_range(conn, from, to, true))
            .await
    }

    pub async fn unfinalized_block_numbers(&self, from: u64, to: u64) -> StoreResult<Vec<u64>> {
        self.run(move |conn| blocks::block_numbers_in_range(conn, from, to, false))
            .await
    }

    pub async fn extrinsics_for_block(&self, block_num: u64) -> StoreResult<Vec<ExtrinsicRecord>> {
        self.run(move |conn| blocks::extrinsics_for_block(conn, block_num)).await
    }

    pub async fn events_for_block(&self, block_num: u64) -> StoreResult<Vec<EventEntry>> {
        self.run(move |conn| blocks::events_for_block(conn, block_num)).await
    }

    pub async fn transfers_for_block(&self, block_num: u64) -> StoreResult<Vec<TransferRecord>> {
        self.run(move |conn| blocks::transfers_for_block(conn, block_num)).await
    }

    pub async fn logs_for_block(&self, block_num: u64) -> StoreResult<Vec<LogRecord>> {
        self.run(move |conn| blocks::logs_for_block(conn, block_num)).await
    }

    pub async fn counts(&self) -> StoreResult<TableCounts> {
        self.run(|conn| blocks::counts(conn)).await
    }

    // Sync status operations
    pub async fn get_sync_status(&self) -> StoreResult<SyncStatusRecord> {
        self.run(|conn| blocks::get_sync_status(conn)).await
    }

    pub async fn update_sync_status(
        &self,
        last_synced: u64,
        finalized: u64,
        tip: u64,
        is_syncing: bool,
    ) -> StoreResult<()> {
        self.run(move |conn| {
            blocks::update_sync_status(conn, last_synced, finalized, tip, is_syncing)
        })
        .await
    }

    // Chain version operations
    pub async fn find_chain_version(&self, spec_version: u32) -> StoreResult<Option<ChainVersion>> {
        self.run(move |conn| versions::find_chain_version(conn, spec_version))
            .await
    }

    pub async fn latest_chain_version(&self) -> StoreResult<Option<ChainVersion>> {
        self.run(|conn| versions::latest_chain_version(conn, None))
            .await
    }

    /// Highest persisted version strictly below `spec_version`
    pub async fn latest_chain_version_below(
        &self,
        spec_version: u32,
    ) -> StoreResult<Option<ChainVersion>> {
        self.run(move |conn| versions::latest_chain_version(conn, Some(spec_version)))
            .await
    }

    pub async fn all_chain_versions(&self) -> StoreResult<Vec<ChainVersion>> {
        self.run(|conn| versions::all_chain_versions(conn)).await
    }

    /// Fails with [`StoreError::Duplicate`] if the spec version already has a row
    pub async fn create_chain_version(&self, version: Arc<ChainVersion>) -> StoreResult<()> {
        self.run(move |conn| versions::create_chain_version(conn, &version))
            .await
    }

    pub async fn get_blob(&self, hash: String) -> StoreResult<Option<Vec<u8>>> {
        self.run(move |conn| versions::get_blob(conn, &hash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_operations() {
        let db = Database::open_in_memory().unwrap();

        db.update_sync_status(100, 95, 105, true).await.unwrap();
        let status = db.get_sync_status().await.unwrap();
        assert_eq!(status.last_synced_block, 100);
        assert_eq!(status.last_finalized_block, 95);
        assert!(status.is_syncing);

        assert!(db.find_block(1).await.unwrap().is_none());
        assert!(db.latest_chain_version().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_on_disk_creates_parent() {
        let dir = std::env::temp_dir().join(format!("chain-scanner-test-{}", std::process::id()));
        let path = dir.join("nested").join("scanner.db");
        let db = Database::open(&path).unwrap();
        db.update_sync_status(1, 1, 1, false).await.unwrap();
        assert!(path.exists());
        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_duplicate_detection() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        let err: StoreError = conn
            .execute("INSERT INTO t (id) VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(err.is_duplicate());

        let err: StoreError = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err().into();
        assert!(!err.is_duplicate());
    }
}
