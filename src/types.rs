//! Rows derived from one block, as committed by the store

use crate::metadata::ErrorInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extrinsic kind for unsigned inherents
pub const KIND_INHERENT: u8 = 99;
/// Extrinsic kind for native balance transfers
pub const KIND_TRANSFER: u8 = 1;
/// Extrinsic kind for every other signed extrinsic
pub const KIND_SIGNED: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub block_num: u64,
    pub block_hash: String,
    pub parent_hash: String,
    pub state_root: String,
    pub extrinsics_root: String,
    pub extrinsics_count: u32,
    pub events_count: u32,
    pub spec_version: u32,
    /// Author account, empty when it could not be resolved
    pub validator: String,
    /// Unix seconds from `timestamp.set`
    pub block_at: i64,
    pub finalized: bool,
}

/// A decoded call argument or event field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedArg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// A string for scalars, a [`ParsedCall`] object for `Call`, an array for `Vec<Call>`
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_type: Option<String>,
}

impl ParsedArg {
    pub fn value_str(&self) -> String {
        crate::chain::value_to_string(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCall {
    pub section: String,
    pub method: String,
    pub args: Vec<ParsedArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtrinsicRecord {
    pub extrinsic_id: String,
    pub block_num: u64,
    pub block_at: i64,
    pub length: u32,
    pub version: u8,
    pub method: String,
    pub section: String,
    /// Every `section.method` reached from this extrinsic, nested calls included
    pub calls: Vec<String>,
    pub args: Vec<ParsedArg>,
    pub error: Option<ErrorInfo>,
    pub kind: u8,
    pub account_id: String,
    pub signature: String,
    pub nonce: u64,
    pub hash: String,
    pub is_signed: bool,
    pub success: bool,
    pub fee: u128,
    pub tip: u128,
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventEntry {
    pub event_id: String,
    pub block_num: u64,
    pub block_at: i64,
    /// None for block-scoped events (initialization / finalization)
    pub extrinsic_id: Option<String>,
    pub section: String,
    pub method: String,
    pub account_id: Option<String>,
    pub data: Vec<ParsedArg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub extrinsic_id: String,
    pub block_num: u64,
    pub block_at: i64,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub section: String,
    pub method: String,
    pub success: bool,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub log_id: String,
    pub block_num: u64,
    pub log_type: String,
    pub data: Value,
}

/// Content-addressed payload split out of an oversized argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRecord {
    pub hash: String,
    pub block_num: u64,
    pub data: Vec<u8>,
}

/// Everything derived from one block, committed in a single transaction
#[derive(Debug, Clone)]
pub struct DecodedUnit {
    pub block: BlockRecord,
    pub extrinsics: Vec<ExtrinsicRecord>,
    pub events: Vec<EventEntry>,
    pub transfers: Vec<TransferRecord>,
    pub logs: Vec<LogRecord>,
    pub blobs: Vec<BlobRecord>,
}
