//! Chain version rows and the blob store

use super::{StoreError, StoreResult};
use crate::metadata::{ChainModule, ChainVersion};
use rusqlite::{params, Connection, OptionalExtension};

const VERSION_COLUMNS: &str = "spec_version, modules, merged_modules, raw_data";

type VersionRow = (i64, String, String, String);

fn version_from_row(row: &rusqlite::Row) -> rusqlite::Result<VersionRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

/// Rebuild a [`ChainVersion`]; the raw metadata is parsed again so error lookups work
fn hydrate((spec, modules, merged, raw): VersionRow) -> StoreResult<ChainVersion> {
    let modules: Vec<ChainModule> = serde_json::from_str(&modules)?;
    let merged: Vec<ChainModule> = serde_json::from_str(&merged)?;
    let raw = serde_json::from_str(&raw)?;
    ChainVersion::from_parts(spec as u32, modules, merged, raw)
        .map_err(|e| StoreError::Corrupt(format!("chain version {}: {}", spec, e)))
}

pub fn find_chain_version(conn: &Connection, spec_version: u32) -> StoreResult<Option<ChainVersion>> {
    let sql = format!(
        "SELECT {} FROM chain_versions WHERE spec_version = ?1",
        VERSION_COLUMNS
    );
    conn.query_row(&sql, params![spec_version as i64], version_from_row)
        .optional()?
        .map(hydrate)
        .transpose()
}

/// Highest persisted version, optionally strictly below `below`
pub fn latest_chain_version(
    conn: &Connection,
    below: Option<u32>,
) -> StoreResult<Option<ChainVersion>> {
    let bound = below.map(i64::from).unwrap_or(i64::MAX);
    let sql = format!(
        "SELECT {} FROM chain_versions WHERE spec_version < ?1
         ORDER BY spec_version DESC LIMIT 1",
        VERSION_COLUMNS
    );
    conn.query_row(&sql, params![bound], version_from_row)
        .optional()?
        .map(hydrate)
        .transpose()
}

pub fn all_chain_versions(conn: &Connection) -> StoreResult<Vec<ChainVersion>> {
    let sql = format!(
        "SELECT {} FROM chain_versions ORDER BY spec_version",
        VERSION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], version_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(hydrate).collect()
}

/// Insert a version row. A second writer for the same spec version gets
/// [`StoreError::Duplicate`].
pub fn create_chain_version(conn: &Connection, version: &ChainVersion) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO chain_versions (spec_version, modules, merged_modules, raw_data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            version.spec_version as i64,
            serde_json::to_string(&version.modules)?,
            serde_json::to_string(&version.merged_modules)?,
            serde_json::to_string(&version.raw_data)?,
            chrono::Utc::now().timestamp()
        ],
    )?;
    Ok(())
}

/// Store a blob unless its hash is already present. Returns true if it was new.
pub fn put_blob(conn: &Connection, hash: &str, block_num: u64, data: &[u8]) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO blobs (hash, block_num, data, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![hash, block_num as i64, data, chrono::Utc::now().timestamp()],
    )?;
    Ok(inserted > 0)
}

pub fn get_blob(conn: &Connection, hash: &str) -> StoreResult<Option<Vec<u8>>> {
    let data = conn
        .query_row("SELECT data FROM blobs WHERE hash = ?1", params![hash], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(data)
}
