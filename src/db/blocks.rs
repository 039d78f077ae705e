use super::StoreResult;
use crate::types::{
    BlockRecord, DecodedUnit, EventEntry, ExtrinsicRecord, LogRecord, TransferRecord,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

/// Sync status record
#[derive(Debug, Clone)]
pub struct SyncStatusRecord {
    pub last_synced_block: u64,
    pub last_finalized_block: u64,
    pub chain_tip_block: u64,
    pub is_syncing: bool,
    pub last_updated: i64,
}

/// Row counts shown by the status command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub blocks: u64,
    pub finalized_blocks: u64,
    pub extrinsics: u64,
    pub events: u64,
    pub transfers: u64,
    pub logs: u64,
    pub chain_versions: u64,
    pub blobs: u64,
}

const BLOCK_COLUMNS: &str = "block_num, block_hash, parent_hash, state_root, extrinsics_root,
     extrinsics_count, events_count, spec_version, validator, block_at, finalized";

fn block_from_row(row: &Row) -> rusqlite::Result<BlockRecord> {
    Ok(BlockRecord {
        block_num: row.get::<_, i64>(0)? as u64,
        block_hash: row.get(1)?,
        parent_hash: row.get(2)?,
        state_root: row.get(3)?,
        extrinsics_root: row.get(4)?,
        extrinsics_count: row.get::<_, i64>(5)? as u32,
        events_count: row.get::<_, i64>(6)? as u32,
        spec_version: row.get::<_, i64>(7)? as u32,
        validator: row.get(8)?,
        block_at: row.get(9)?,
        finalized: row.get::<_, i32>(10)? != 0,
    })
}

/// Deserialize a JSON text column inside a row mapper
fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// u128 amounts are stored as decimal text; SQLite integers stop at i64
fn u128_col(row: &Row, idx: usize) -> rusqlite::Result<u128> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// `calls` is stored as `;section.method;section.method` so a LIKE '%;name%' matches
fn encode_calls(calls: &[String]) -> String {
    calls.iter().map(|c| format!(";{}", c)).collect()
}

fn decode_calls(stored: &str) -> Vec<String> {
    stored
        .split(';')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Get a block by number
pub fn find_block(conn: &Connection, block_num: u64) -> StoreResult<Option<BlockRecord>> {
    let sql = format!("SELECT {} FROM blocks WHERE block_num = ?1", BLOCK_COLUMNS);
    let block = conn
        .query_row(&sql, params![block_num as i64], block_from_row)
        .optional()?;
    Ok(block)
}

/// Get the highest stored block
pub fn latest_block(conn: &Connection) -> StoreResult<Option<BlockRecord>> {
    let sql = format!(
        "SELECT {} FROM blocks ORDER BY block_num DESC LIMIT 1",
        BLOCK_COLUMNS
    );
    let block = conn.query_row(&sql, [], block_from_row).optional()?;
    Ok(block)
}

/// Insert a block and every derived row in one transaction
///
/// The block insert is a plain INSERT so an existing row surfaces as a duplicate
/// instead of being silently replaced. Blobs are shared across blocks and ignore
/// conflicts.
pub fn commit_block(conn: &mut Connection, unit: &DecodedUnit) -> StoreResult<()> {
    let tx = conn.transaction()?;
    let now = chrono::Utc::now().timestamp();
    let block = &unit.block;

    tx.execute(
        "INSERT INTO blocks
         (block_num, block_hash, parent_hash, state_root, extrinsics_root,
          extrinsics_count, events_count, spec_version, validator, block_at, finalized, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            block.block_num as i64,
            &block.block_hash,
            &block.parent_hash,
            &block.state_root,
            &block.extrinsics_root,
            block.extrinsics_count as i64,
            block.events_count as i64,
            block.spec_version as i64,
            &block.validator,
            block.block_at,
            block.finalized as i32,
            now
        ],
    )?;

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO extrinsics
             (extrinsic_id, block_num, block_at, extrinsic_length, version_info, method, section,
              calls, args, error, kind, account_id, signature, nonce, extrinsic_hash, is_signed,
              success, fee, tip, finalized)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        )?;
        for ex in &unit.extrinsics {
            let error = ex.error.as_ref().map(serde_json::to_string).transpose()?;
            stmt.execute(params![
                &ex.extrinsic_id,
                ex.block_num as i64,
                ex.block_at,
                ex.length as i64,
                ex.version as i64,
                &ex.method,
                &ex.section,
                encode_calls(&ex.calls),
                serde_json::to_string(&ex.args)?,
                error,
                ex.kind as i64,
                &ex.account_id,
                &ex.signature,
                ex.nonce as i64,
                &ex.hash,
                ex.is_signed as i32,
                ex.success as i32,
                ex.fee.to_string(),
                ex.tip.to_string(),
                ex.finalized as i32,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO events
             (event_id, block_num, block_at, extrinsic_id, section, method, account_id, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for ev in &unit.events {
            stmt.execute(params![
                &ev.event_id,
                ev.block_num as i64,
                ev.block_at,
                &ev.extrinsic_id,
                &ev.section,
                &ev.method,
                &ev.account_id,
                serde_json::to_string(&ev.data)?,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO transfers
             (extrinsic_id, block_num, block_at, from_account, to_account, amount,
              section, method, success, nonce)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for t in &unit.transfers {
            stmt.execute(params![
                &t.extrinsic_id,
                t.block_num as i64,
                t.block_at,
                &t.from,
                &t.to,
                &t.amount,
                &t.section,
                &t.method,
                t.success as i32,
                t.nonce as i64,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO logs (log_id, block_num, log_type, data) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for log in &unit.logs {
            stmt.execute(params![
                &log.log_id,
                log.block_num as i64,
                &log.log_type,
                serde_json::to_string(&log.data)?,
            ])?;
        }
    }

    for blob in &unit.blobs {
        if !super::versions::put_blob(&tx, &blob.hash, blob.block_num, &blob.data)? {
            tracing::debug!("Blob {} already stored", blob.hash);
        }
    }

    tx.commit()?;
    Ok(())
}

/// Mark a block and its extrinsics finalized. Returns false if the block is absent.
pub fn update_finalized(conn: &mut Connection, block_num: u64) -> StoreResult<bool> {
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE blocks SET finalized = 1 WHERE block_num = ?1",
        params![block_num as i64],
    )?;
    tx.execute(
        "UPDATE extrinsics SET finalized = 1 WHERE block_num = ?1",
        params![block_num as i64],
    )?;
    tx.commit()?;
    Ok(updated > 0)
}

/// Delete blocks; child rows go with them through ON DELETE CASCADE
pub fn delete_blocks(conn: &mut Connection, numbers: &[u64]) -> StoreResult<usize> {
    let tx = conn.transaction()?;
    let mut deleted = 0;
    {
        let mut stmt = tx.prepare_cached("DELETE FROM blocks WHERE block_num = ?1")?;
        for n in numbers {
            deleted += stmt.execute(params![*n as i64])?;
        }
    }
    tx.commit()?;
    Ok(deleted)
}

/// Stored block numbers in `[from, to]` with the given finalized flag, ascending
pub fn block_numbers_in_range(
    conn: &Connection,
    from: u64,
    to: u64,
    finalized: bool,
) -> StoreResult<Vec<u64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT block_num FROM blocks
         WHERE block_num >= ?1 AND block_num <= ?2 AND finalized = ?3
         ORDER BY block_num",
    )?;
    let numbers = stmt
        .query_map(params![from as i64, to as i64, finalized as i32], |row| {
            row.get::<_, i64>(0).map(|n| n as u64)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(numbers)
}

pub fn extrinsics_for_block(conn: &Connection, block_num: u64) -> StoreResult<Vec<ExtrinsicRecord>> {
    let mut stmt = conn.prepare(
        "SELECT extrinsic_id, block_num, block_at, extrinsic_length, version_info, method,
                section, calls, args, error, kind, account_id, signature, nonce, extrinsic_hash,
                is_signed, success, fee, tip, finalized
         FROM extrinsics WHERE block_num = ?1 ORDER BY extrinsic_id",
    )?;
    let rows = stmt
        .query_map(params![block_num as i64], |row| {
            let calls: String = row.get(7)?;
            let error: Option<String> = row.get(9)?;
            let error = error
                .map(|e| serde_json::from_str(&e))
                .transpose()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;
            Ok(ExtrinsicRecord {
                extrinsic_id: row.get(0)?,
                block_num: row.get::<_, i64>(1)? as u64,
                block_at: row.get(2)?,
                length: row.get::<_, i64>(3)? as u32,
                version: row.get::<_, i64>(4)? as u8,
                method: row.get(5)?,
                section: row.get(6)?,
                calls: decode_calls(&calls),
                args: json_col(row, 8)?,
                error,
                kind: row.get::<_, i64>(10)? as u8,
                account_id: row.get(11)?,
                signature: row.get(12)?,
                nonce: row.get::<_, i64>(13)? as u64,
                hash: row.get(14)?,
                is_signed: row.get::<_, i32>(15)? != 0,
                success: row.get::<_, i32>(16)? != 0,
                fee: u128_col(row, 17)?,
                tip: u128_col(row, 18)?,
                finalized: row.get::<_, i32>(19)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn events_for_block(conn: &Connection, block_num: u64) -> StoreResult<Vec<EventEntry>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, block_num, block_at, extrinsic_id, section, method, account_id, data
         FROM events WHERE block_num = ?1 ORDER BY event_id",
    )?;
    let rows = stmt
        .query_map(params![block_num as i64], |row| {
            Ok(EventEntry {
                event_id: row.get(0)?,
                block_num: row.get::<_, i64>(1)? as u64,
                block_at: row.get(2)?,
                extrinsic_id: row.get(3)?,
                section: row.get(4)?,
                method: row.get(5)?,
                account_id: row.get(6)?,
                data: json_col(row, 7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn transfers_for_block(conn: &Connection, block_num: u64) -> StoreResult<Vec<TransferRecord>> {
    let mut stmt = conn.prepare(
        "SELECT extrinsic_id, block_num, block_at, from_account, to_account, amount,
                section, method, success, nonce
         FROM transfers WHERE block_num = ?1 ORDER BY extrinsic_id",
    )?;
    let rows = stmt
        .query_map(params![block_num as i64], |row| {
            Ok(TransferRecord {
                extrinsic_id: row.get(0)?,
                block_num: row.get::<_, i64>(1)? as u64,
                block_at: row.get(2)?,
                from: row.get(3)?,
                to: row.get(4)?,
                amount: row.get(5)?,
                section: row.get(6)?,
                method: row.get(7)?,
                success: row.get::<_, i32>(8)? != 0,
                nonce: row.get::<_, i64>(9)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn logs_for_block(conn: &Connection, block_num: u64) -> StoreResult<Vec<LogRecord>> {
    let mut stmt = conn.prepare(
        "SELECT log_id, block_num, log_type, data FROM logs
         WHERE block_num = ?1 ORDER BY CAST(substr(log_id, instr(log_id, '-') + 1) AS INTEGER)",
    )?;
    let rows = stmt
        .query_map(params![block_num as i64], |row| {
            Ok(LogRecord {
                log_id: row.get(0)?,
                block_num: row.get::<_, i64>(1)? as u64,
                log_type: row.get(2)?,
                data: json_col(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count(conn: &Connection, sql: &str) -> StoreResult<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}

pub fn counts(conn: &Connection) -> StoreResult<TableCounts> {
    Ok(TableCounts {
        blocks: count(conn, "SELECT COUNT(*) FROM blocks")?,
        finalized_blocks: count(conn, "SELECT COUNT(*) FROM blocks WHERE finalized = 1")?,
        extrinsics: count(conn, "SELECT COUNT(*) FROM extrinsics")?,
        events: count(conn, "SELECT COUNT(*) FROM events")?,
        transfers: count(conn, "SELECT COUNT(*) FROM transfers")?,
        logs: count(conn, "SELECT COUNT(*) FROM logs")?,
        chain_versions: count(conn, "SELECT COUNT(*) FROM chain_versions")?,
        blobs: count(conn, "SELECT COUNT(*) FROM blobs")?,
    })
}

/// Get sync status
pub fn get_sync_status(conn: &Connection) -> StoreResult<SyncStatusRecord> {
    let status = conn.query_row(
        "SELECT last_synced_block, last_finalized_block, chain_tip_block,
                is_syncing, last_updated
         FROM sync_status WHERE id = 1",
        [],
        |row| {
            Ok(SyncStatusRecord {
                last_synced_block: row.get::<_, i64>(0)? as u64,
                last_finalized_block: row.get::<_, i64>(1)? as u64,
                chain_tip_block: row.get::<_, i64>(2)? as u64,
                is_syncing: row.get::<_, i32>(3)? != 0,
                last_updated: row.get(4)?,
            })
        },
    )?;
    Ok(status)
}

/// Update sync status
pub fn update_sync_status(
    conn: &Connection,
    last_synced: u64,
    finalized: u64,
    tip: u64,
    is_syncing: bool,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE sync_status SET
         last_synced_block = ?1,
         last_finalized_block = ?2,
         chain_tip_block = ?3,
         is_syncing = ?4,
         last_updated = ?5
         WHERE id = 1",
        params![
            last_synced as i64,
            finalized as i64,
            tip as i64,
            is_syncing as i32,
            chrono::Utc::now().timestamp()
        ],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::schema::init_schema;
    use super::*;
    use crate::metadata::ErrorInfo;
    use crate::types::{BlobRecord, ParsedArg, KIND_INHERENT, KIND_TRANSFER};
    use serde_json::json;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    /// A two-extrinsic block: timestamp inherent plus a transfer
    pub(crate) fn sample_unit(block_num: u64, hash: &str) -> DecodedUnit {
        let block_at = 1_650_000_000 + block_num as i64;
        let ts = ExtrinsicRecord {
            extrinsic_id: format!("{}-0", block_num),
            block_num,
            block_at,
            length: 10,
            version: 4,
            method: "set".into(),
            section: "timestamp".into(),
            calls: vec!["timestamp.set".into()],
            args: vec![ParsedArg {
                name: "now".into(),
                type_name: "Compact<u64>".into(),
                value: json!("1650000000000"),
                special_type: None,
            }],
            error: None,
            kind: KIND_INHERENT,
            account_id: String::new(),
            signature: String::new(),
            nonce: 0,
            hash: format!("{}-ts", hash),
            is_signed: false,
            success: true,
            fee: 0,
            tip: 0,
            finalized: false,
        };
        let transfer = ExtrinsicRecord {
            extrinsic_id: format!("{}-1", block_num),
            method: "transfer".into(),
            section: "balances".into(),
            calls: vec!["balances.transfer".into()],
            args: vec![],
            kind: KIND_TRANSFER,
            account_id: "5Alice".into(),
            signature: "0xsig".into(),
            nonce: 3,
            hash: format!("{}-tx", hash),
            is_signed: true,
            fee: 125_000_000_000_000_000_000u128,
            tip: 1,
            ..ts.clone()
        };

        DecodedUnit {
            block: BlockRecord {
                block_num,
                block_hash: hash.to_string(),
                parent_hash: "0xparent".into(),
                state_root: "0xstate".into(),
                extrinsics_root: "0xext".into(),
                extrinsics_count: 2,
                events_count: 1,
                spec_version: 9000,
                validator: "5Validator".into(),
                block_at,
                finalized: false,
            },
            events: vec![EventEntry {
                event_id: format!("{}-0", block_num),
                block_num,
                block_at,
                extrinsic_id: Some(transfer.extrinsic_id.clone()),
                section: "balances".into(),
                method: "Transfer".into(),
                account_id: Some("5Alice".into()),
                data: vec![],
            }],
            transfers: vec![TransferRecord {
                extrinsic_id: transfer.extrinsic_id.clone(),
                block_num,
                block_at,
                from: "5Alice".into(),
                to: "5Bob".into(),
                amount: "1000".into(),
                section: "balances".into(),
                method: "transfer".into(),
                success: true,
                nonce: 3,
            }],
            logs: vec![LogRecord {
                log_id: format!("{}-0", block_num),
                block_num,
                log_type: "PreRuntime".into(),
                data: json!(["BABE", "0x01"]),
            }],
            blobs: vec![],
            extrinsics: vec![ts, transfer],
        }
    }

    #[test]
    fn test_commit_and_read_back() {
        let mut conn = setup_db();
        let mut unit = sample_unit(100, "0xaaa");
        unit.extrinsics[1].success = false;
        unit.extrinsics[1].error = Some(ErrorInfo {
            module: "Balances".into(),
            name: "InsufficientBalance".into(),
            message: "Balance too low".into(),
        });
        commit_block(&mut conn, &unit).unwrap();

        let block = find_block(&conn, 100).unwrap().unwrap();
        assert_eq!(block, unit.block);

        let extrinsics = extrinsics_for_block(&conn, 100).unwrap();
        assert_eq!(extrinsics, unit.extrinsics);
        assert_eq!(extrinsics[1].fee, 125_000_000_000_000_000_000u128);

        assert_eq!(events_for_block(&conn, 100).unwrap(), unit.events);
        assert_eq!(transfers_for_block(&conn, 100).unwrap(), unit.transfers);
        assert_eq!(logs_for_block(&conn, 100).unwrap(), unit.logs);
    }

    #[test]
    fn test_second_commit_is_duplicate() {
        let mut conn = setup_db();
        commit_block(&mut conn, &sample_unit(7, "0xaaa")).unwrap();

        let err = commit_block(&mut conn, &sample_unit(7, "0xbbb")).unwrap_err();
        assert!(err.is_duplicate(), "unexpected error {:?}", err);

        // The failed transaction left nothing behind
        let c = counts(&conn).unwrap();
        assert_eq!(c.blocks, 1);
        assert_eq!(c.extrinsics, 2);
        assert_eq!(find_block(&conn, 7).unwrap().unwrap().block_hash, "0xaaa");
    }

    #[test]
    fn test_delete_cascades_to_children() {
        let mut conn = setup_db();
        commit_block(&mut conn, &sample_unit(1, "0x01")).unwrap();
        commit_block(&mut conn, &sample_unit(2, "0x02")).unwrap();

        assert_eq!(delete_blocks(&mut conn, &[1, 99]).unwrap(), 1);

        let c = counts(&conn).unwrap();
        assert_eq!(c.blocks, 1);
        assert_eq!(c.extrinsics, 2);
        assert_eq!(c.events, 1);
        assert_eq!(c.transfers, 1);
        assert_eq!(c.logs, 1);
        assert!(extrinsics_for_block(&conn, 1).unwrap().is_empty());
    }

    #[test]
    fn test_update_finalized() {
        let mut conn = setup_db();
        commit_block(&mut conn, &sample_unit(5, "0x05")).unwrap();

        assert!(update_finalized(&mut conn, 5).unwrap());
        assert!(!update_finalized(&mut conn, 6).unwrap());

        assert!(find_block(&conn, 5).unwrap().unwrap().finalized);
        assert!(extrinsics_for_block(&conn, 5)
            .unwrap()
            .iter()
            .all(|e| e.finalized));
    }

    #[test]
    fn test_block_numbers_in_range() {
        let mut conn = setup_db();
        for n in 1..=6 {
            commit_block(&mut conn, &sample_unit(n, &format!("0x{:02}", n))).unwrap();
        }
        update_finalized(&mut conn, 2).unwrap();
        update_finalized(&mut conn, 4).unwrap();

        assert_eq!(block_numbers_in_range(&conn, 1, 5, true).unwrap(), vec![2, 4]);
        assert_eq!(block_numbers_in_range(&conn, 2, 6, false).unwrap(), vec![3, 5, 6]);
        assert_eq!(latest_block(&conn).unwrap().unwrap().block_num, 6);
    }

    #[test]
    fn test_blobs_shared_between_blocks() {
        let mut conn = setup_db();
        let blob = BlobRecord {
            hash: "0xfeed".into(),
            block_num: 1,
            data: vec![7u8; 32],
        };
        let mut first = sample_unit(1, "0x01");
        first.blobs = vec![blob.clone()];
        let mut second = sample_unit(2, "0x02");
        second.blobs = vec![BlobRecord { block_num: 2, ..blob }];

        commit_block(&mut conn, &first).unwrap();
        commit_block(&mut conn, &second).unwrap();
        assert_eq!(counts(&conn).unwrap().blobs, 1);
        assert_eq!(
            crate::db::versions::get_blob(&conn, "0xfeed").unwrap(),
            Some(vec![7u8; 32])
        );

        // Forked blocks do not take their blobs with them
        delete_blocks(&mut conn, &[1]).unwrap();
        assert_eq!(counts(&conn).unwrap().blobs, 1);
    }

    #[test]
    fn test_sync_status() {
        let conn = setup_db();

        let status = get_sync_status(&conn).unwrap();
        assert_eq!(status.last_synced_block, 0);

        update_sync_status(&conn, 1000, 990, 1005, true).unwrap();

        let status = get_sync_status(&conn).unwrap();
        assert_eq!(status.last_synced_block, 1000);
        assert_eq!(status.last_finalized_block, 990);
        assert_eq!(status.chain_tip_block, 1005);
        assert!(status.is_syncing);
    }

    #[test]
    fn test_calls_encoding() {
        let calls = vec!["utility.batch".to_string(), "balances.transfer".to_string()];
        let stored = encode_calls(&calls);
        assert_eq!(stored, ";utility.batch;balances.transfer");
        assert_eq!(decode_calls(&stored), calls);
        assert!(decode_calls("").is_empty());
    }
}
