//! Block decoding
//!
//! [`decode_block`] is a pure function of the fetched block, its event records, the
//! runtime version and the session validator set. Either the whole block decodes into
//! a [`DecodedUnit`] or nothing does.

mod args;
mod author;
mod digest;
mod events;

pub use author::{resolve_author, SessionCache};
pub use digest::decode_logs;
pub use events::DispatchError;

use crate::chain::{value_to_u128, ChainBlock, EventRecord, Extrinsic};
use crate::metadata::ChainVersion;
use crate::types::{
    BlockRecord, DecodedUnit, EventEntry, ExtrinsicRecord, TransferRecord, KIND_INHERENT,
    KIND_SIGNED, KIND_TRANSFER,
};
use args::{parse_call, BlobStage, CallContext};
use events::parse_event_args;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed call {call}: {reason}")]
    MalformedCall { call: String, reason: String },

    #[error("Failed to encode decoded value: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// `Bytes` arguments longer than this are moved to blob storage
    pub min_blob_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            min_blob_size: 65_536,
        }
    }
}

/// Everything fetched from the chain for one block
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub block: ChainBlock,
    pub events: Vec<EventRecord>,
    /// Partial fee per extrinsic, zero for unsigned ones
    pub fees: Vec<u128>,
    pub spec_version: u32,
    pub validators: Arc<Vec<String>>,
    pub finalized: bool,
}

/// Balance calls that produce a transfer row
const TRANSFER_CALLS: [(&str, &str); 3] = [
    ("balances", "transfer"),
    ("balances", "transferKeepAlive"),
    ("balances", "transferAllowDeath"),
];

pub fn extrinsic_kind(section: &str, method: &str, is_signed: bool) -> u8 {
    if !is_signed {
        KIND_INHERENT
    } else if TRANSFER_CALLS.contains(&(section, method)) {
        KIND_TRANSFER
    } else {
        KIND_SIGNED
    }
}

/// `idx` zero-padded to the width of the largest index in a collection of `count`
pub fn pad_index(idx: usize, count: usize) -> String {
    let width = count.saturating_sub(1).to_string().len();
    format!("{:0width$}", idx, width = width)
}

fn is_outcome_event(record: &EventRecord) -> bool {
    record.event.is("system", "ExtrinsicSuccess") || record.event.is("system", "ExtrinsicFailed")
}

/// Unix seconds from the block's `timestamp.set` inherent, 0 when absent
fn block_timestamp(extrinsics: &[Extrinsic]) -> Result<i64, DecodeError> {
    let Some(set) = extrinsics
        .iter()
        .find(|ex| ex.call.section == "timestamp" && ex.call.method == "set")
    else {
        return Ok(0);
    };
    let millis = set
        .call
        .args
        .first()
        .and_then(|arg| value_to_u128(&arg.value))
        .ok_or_else(|| DecodeError::MalformedCall {
            call: "timestamp.set".to_string(),
            reason: "missing or non-numeric moment".to_string(),
        })?;
    Ok((millis / 1000) as i64)
}

pub fn decode_block(
    fetched: &FetchedBlock,
    version: &ChainVersion,
    options: &DecodeOptions,
) -> Result<DecodedUnit, DecodeError> {
    let block = &fetched.block;
    let block_num = block.number();
    let block_at = block_timestamp(&block.extrinsics)?;
    let extrinsics_count = block.extrinsics.len();
    let records_count = fetched.events.len();

    let mut blobs = BlobStage::new(block_num, options.min_blob_size);
    let mut extrinsics = Vec::with_capacity(extrinsics_count);
    let mut events = Vec::new();
    let mut transfers = Vec::new();

    for (ex_index, ex) in block.extrinsics.iter().enumerate() {
        let extrinsic_id = format!("{}-{}", block_num, pad_index(ex_index, extrinsics_count));

        let mut ctx = CallContext::new(&mut blobs);
        let call = parse_call(&ex.call, &mut ctx)?;
        let calls = ctx.into_calls();

        let mut success = true;
        let mut error = None;
        for (record_index, record) in fetched.events.iter().enumerate() {
            if record.phase.extrinsic_index() != Some(ex_index) {
                continue;
            }
            if record.event.is("system", "ExtrinsicFailed") {
                success = false;
                error = record
                    .event
                    .args
                    .first()
                    .map(|arg| DispatchError::from_value(&arg.value).resolve(version));
                continue;
            }
            if is_outcome_event(record) {
                continue;
            }
            events.push(EventEntry {
                event_id: format!("{}-{}", block_num, pad_index(record_index, records_count)),
                block_num,
                block_at,
                extrinsic_id: Some(extrinsic_id.clone()),
                section: record.event.section.clone(),
                method: record.event.method.clone(),
                account_id: ex.signer().map(str::to_string),
                data: parse_event_args(&record.event, version),
            });
        }

        let kind = extrinsic_kind(&call.section, &call.method, ex.is_signed());
        if kind == KIND_TRANSFER {
            let (Some(to), Some(amount)) = (call.args.first(), call.args.get(1)) else {
                return Err(DecodeError::MalformedCall {
                    call: format!("{}.{}", call.section, call.method),
                    reason: "transfer without destination and amount".to_string(),
                });
            };
            transfers.push(TransferRecord {
                extrinsic_id: extrinsic_id.clone(),
                block_num,
                block_at,
                from: ex.signer().unwrap_or_default().to_string(),
                to: to.value_str(),
                amount: amount.value_str(),
                section: call.section.clone(),
                method: call.method.clone(),
                success,
                nonce: ex.nonce(),
            });
        }

        let signature = ex.signature.as_ref();
        extrinsics.push(ExtrinsicRecord {
            extrinsic_id,
            block_num,
            block_at,
            length: ex.length,
            version: ex.version,
            method: call.method,
            section: call.section,
            calls,
            args: call.args,
            error,
            kind,
            account_id: signature.map(|s| s.signer.clone()).unwrap_or_default(),
            signature: signature.map(|s| s.signature.clone()).unwrap_or_default(),
            nonce: ex.nonce(),
            hash: ex.hash.clone(),
            is_signed: ex.is_signed(),
            success,
            fee: if ex.is_signed() {
                fetched.fees.get(ex_index).copied().unwrap_or(0)
            } else {
                0
            },
            tip: ex.tip(),
            finalized: fetched.finalized,
        });
    }

    // Initialization / finalization events, plus any record pointing past the extrinsics
    for (record_index, record) in fetched.events.iter().enumerate() {
        let scoped = matches!(record.phase.extrinsic_index(), Some(i) if i < extrinsics_count);
        if scoped || is_outcome_event(record) {
            continue;
        }
        events.push(EventEntry {
            event_id: format!("{}-{}", block_num, pad_index(record_index, records_count)),
            block_num,
            block_at,
            extrinsic_id: None,
            section: record.event.section.clone(),
            method: record.event.method.clone(),
            account_id: None,
            data: parse_event_args(&record.event, version),
        });
    }

    let digest_logs = block.header.digest_logs();
    let header = &block.header;
    Ok(DecodedUnit {
        block: BlockRecord {
            block_num,
            block_hash: block.hash.clone(),
            parent_hash: header.parent_hash.clone(),
            state_root: header.state_root.clone(),
            extrinsics_root: header.extrinsics_root.clone(),
            extrinsics_count: extrinsics_count as u32,
            events_count: events.len() as u32,
            spec_version: fetched.spec_version,
            validator: resolve_author(digest_logs, &fetched.validators).unwrap_or_default(),
            block_at,
            finalized: fetched.finalized,
        },
        extrinsics,
        events,
        transfers,
        logs: decode_logs(block_num, digest_logs),
        blobs: blobs.into_records(),
    })
}
