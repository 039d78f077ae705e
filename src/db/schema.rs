use anyhow::{bail, Result};
use rusqlite::Connection;
use tracing::info;

/// Current schema version - increment when making schema changes
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for the scanner database
///
/// Every child table references `blocks` with `ON DELETE CASCADE`, so replacing a
/// forked block is a single delete followed by a fresh insert. Blobs are shared
/// between blocks and never cascade.
pub const SCHEMA: &str = r#"
-- Schema metadata for version tracking and migrations
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS blocks (
    block_num INTEGER PRIMARY KEY,
    block_hash TEXT NOT NULL,
    parent_hash TEXT NOT NULL,
    state_root TEXT NOT NULL,
    extrinsics_root TEXT NOT NULL,
    extrinsics_count INTEGER NOT NULL DEFAULT 0,
    events_count INTEGER NOT NULL DEFAULT 0,
    spec_version INTEGER NOT NULL,
    validator TEXT NOT NULL DEFAULT '',
    block_at INTEGER NOT NULL,
    finalized INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocks_hash ON blocks(block_hash);
CREATE INDEX IF NOT EXISTS idx_blocks_at ON blocks(block_at);
CREATE INDEX IF NOT EXISTS idx_blocks_validator ON blocks(validator);

CREATE TABLE IF NOT EXISTS extrinsics (
    extrinsic_id TEXT PRIMARY KEY,
    block_num INTEGER NOT NULL REFERENCES blocks(block_num) ON DELETE CASCADE,
    block_at INTEGER NOT NULL,
    extrinsic_length INTEGER NOT NULL,
    version_info INTEGER NOT NULL,
    method TEXT NOT NULL,
    section TEXT NOT NULL,
    calls TEXT NOT NULL,
    args TEXT NOT NULL,
    error TEXT,
    kind INTEGER NOT NULL,
    account_id TEXT NOT NULL DEFAULT '',
    signature TEXT NOT NULL DEFAULT '',
    nonce INTEGER NOT NULL DEFAULT 0,
    extrinsic_hash TEXT NOT NULL,
    is_signed INTEGER NOT NULL,
    success INTEGER NOT NULL,
    fee TEXT NOT NULL,
    tip TEXT NOT NULL,
    finalized INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_extrinsics_block ON extrinsics(block_num);
CREATE INDEX IF NOT EXISTS idx_extrinsics_account ON extrinsics(account_id);
CREATE INDEX IF NOT EXISTS idx_extrinsics_call ON extrinsics(section, method);
CREATE INDEX IF NOT EXISTS idx_extrinsics_hash ON extrinsics(extrinsic_hash);

CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    block_num INTEGER NOT NULL REFERENCES blocks(block_num) ON DELETE CASCADE,
    block_at INTEGER NOT NULL,
    extrinsic_id TEXT,
    section TEXT NOT NULL,
    method TEXT NOT NULL,
    account_id TEXT,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_block ON events(block_num);
CREATE INDEX IF NOT EXISTS idx_events_extrinsic ON events(extrinsic_id);
CREATE INDEX IF NOT EXISTS idx_events_name ON events(section, method);

CREATE TABLE IF NOT EXISTS transfers (
    extrinsic_id TEXT PRIMARY KEY,
    block_num INTEGER NOT NULL REFERENCES blocks(block_num) ON DELETE CASCADE,
    block_at INTEGER NOT NULL,
    from_account TEXT NOT NULL,
    to_account TEXT NOT NULL,
    amount TEXT NOT NULL,
    section TEXT NOT NULL,
    method TEXT NOT NULL,
    success INTEGER NOT NULL,
    nonce INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(from_account);
CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(to_account);

CREATE TABLE IF NOT EXISTS logs (
    log_id TEXT PRIMARY KEY,
    block_num INTEGER NOT NULL REFERENCES blocks(block_num) ON DELETE CASCADE,
    log_type TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_block ON logs(block_num);

-- One row per runtime spec version, written once
CREATE TABLE IF NOT EXISTS chain_versions (
    spec_version INTEGER PRIMARY KEY,
    modules TEXT NOT NULL,
    merged_modules TEXT NOT NULL,
    raw_data TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Content-addressed oversized call arguments
CREATE TABLE IF NOT EXISTS blobs (
    hash TEXT PRIMARY KEY,
    block_num INTEGER NOT NULL,
    data BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

-- Sync progress (singleton row)
CREATE TABLE IF NOT EXISTS sync_status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_synced_block INTEGER NOT NULL DEFAULT 0,
    last_finalized_block INTEGER NOT NULL DEFAULT 0,
    chain_tip_block INTEGER NOT NULL DEFAULT 0,
    is_syncing INTEGER DEFAULT 1,
    last_updated INTEGER NOT NULL
);

-- Initialize singleton
INSERT OR IGNORE INTO sync_status (id, last_synced_block, last_finalized_block, chain_tip_block, last_updated)
VALUES (1, 0, 0, 0, 0);
"#;

/// Initialize database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Get a metadata value from schema_meta
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM schema_meta WHERE key = ?1",
        [key],
        |row| row.get(0),
    );
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Set a metadata value in schema_meta
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get the current schema version from the database (0 if not set)
pub fn get_schema_version(conn: &Connection) -> Result<u32> {
    match get_meta(conn, "schema_version")? {
        Some(v) => Ok(v.parse().unwrap_or(0)),
        None => Ok(0),
    }
}

fn stamp_version(conn: &Connection, version: u32) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let app_version = env!("CARGO_PKG_VERSION");
    if get_meta(conn, "created_at")?.is_none() {
        set_meta(conn, "created_at", &now)?;
        set_meta(conn, "created_by", app_version)?;
    }
    set_meta(conn, "schema_version", &version.to_string())?;
    set_meta(conn, "last_migration", &now)?;
    set_meta(conn, "last_migrated_by", app_version)?;
    Ok(())
}

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`]
///
/// Refuses to open a database written by a newer scanner.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let db_version = get_schema_version(conn)?;

    if db_version > CURRENT_SCHEMA_VERSION {
        bail!(
            "Database schema version ({}) is newer than this scanner supports ({}). \
             Please upgrade the scanner.",
            db_version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if db_version == 0 {
        stamp_version(conn, CURRENT_SCHEMA_VERSION)?;
        info!("Initialized new database with schema version {}", CURRENT_SCHEMA_VERSION);
        return Ok(());
    }

    for version in (db_version + 1)..=CURRENT_SCHEMA_VERSION {
        run_migration(conn, version)?;
        stamp_version(conn, version)?;
        info!("Completed migration to version {}", version);
    }

    Ok(())
}

/// Add new migrations here as match arms when schema changes
fn run_migration(_conn: &Connection, to_version: u32) -> Result<()> {
    match to_version {
        1 => Ok(()),
        _ => bail!("Unknown migration version: {}", to_version),
    }
}
