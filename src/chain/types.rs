//! Decoded chain values as delivered by the decoding client
//!
//! Every call and event argument carries its declared type name so that the block
//! decoder can branch on it without access to the runtime type registry.

use crate::rpc::BlockHeader;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A block with its header and decoded extrinsics
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub hash: String,
    pub header: BlockHeader,
    pub extrinsics: Vec<Extrinsic>,
}

impl ChainBlock {
    pub fn number(&self) -> u64 {
        self.header.block_number()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extrinsic {
    /// SCALE encoding of the whole extrinsic, used for fee estimation
    pub hex: String,
    pub hash: String,
    pub length: u32,
    pub version: u8,
    #[serde(default)]
    pub signature: Option<ExtrinsicSignature>,
    pub call: Call,
}

impl Extrinsic {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn signer(&self) -> Option<&str> {
        self.signature.as_ref().map(|s| s.signer.as_str())
    }

    pub fn nonce(&self) -> u64 {
        self.signature.as_ref().map(|s| s.nonce).unwrap_or(0)
    }

    pub fn tip(&self) -> u128 {
        self.signature.as_ref().map(|s| s.tip).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtrinsicSignature {
    pub signer: String,
    pub signature: String,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default, deserialize_with = "tip_amount")]
    pub tip: u128,
}

/// A dispatchable call; nested calls appear as argument values
#[derive(Debug, Clone, Deserialize)]
pub struct Call {
    pub section: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<TypedArg>,
}

/// A call or event argument with its declared type
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedArg {
    #[serde(default)]
    pub name: String,
    /// Declared type, e.g. `Call`, `Vec<Call>`, `Bytes`, `Compact<u128>`
    #[serde(rename = "type")]
    pub type_name: String,
    /// Source-level alias, e.g. `T::Balance` or `DispatchResult`
    #[serde(default)]
    pub type_alias: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl TypedArg {
    /// The most specific type name available
    pub fn display_type(&self) -> &str {
        match self.type_alias.as_deref() {
            Some(alias) if !alias.is_empty() => alias,
            _ => &self.type_name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub phase: Phase,
    pub event: Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Phase {
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

impl Phase {
    pub fn extrinsic_index(&self) -> Option<usize> {
        match self {
            Phase::ApplyExtrinsic(idx) => Some(*idx as usize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub section: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<TypedArg>,
}

impl Event {
    pub fn is(&self, section: &str, method: &str) -> bool {
        self.section == section && self.method == method
    }
}

/// A null tip is zero; anything else must parse as an amount
fn tip_amount<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(0);
    }
    value_to_u128(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid tip value: {}", value)))
}

/// Numeric value from a JSON number, decimal string or hex string
pub fn value_to_u128(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) if s.starts_with("0x") => {
            u128::from_str_radix(s.trim_start_matches("0x"), 16).ok()
        }
        Value::String(s) => s.replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Render a decoded value the way it is stored: strings as-is, everything else as JSON
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
