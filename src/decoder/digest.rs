//! Header digest items
//!
//! Logs arrive as SCALE-encoded hex. Engine items carry a 4-byte engine id (`BABE`,
//! `aura`, `FRNK`, ...) and an opaque payload.
//!
//! Example AURA pre-runtime item: "0x066175726120778c911100000000"

use crate::types::LogRecord;
use anyhow::{Context, Result};
use scale::{Decode, DecodeAll};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub enum DigestItem {
    #[codec(index = 0)]
    Other(Vec<u8>),
    #[codec(index = 4)]
    Consensus { engine: [u8; 4], data: Vec<u8> },
    #[codec(index = 5)]
    Seal { engine: [u8; 4], data: Vec<u8> },
    #[codec(index = 6)]
    PreRuntime { engine: [u8; 4], data: Vec<u8> },
    #[codec(index = 8)]
    RuntimeEnvironmentUpdated,
}

impl DigestItem {
    pub fn parse(hex_log: &str) -> Result<Self> {
        let bytes = hex::decode(hex_log.trim_start_matches("0x")).context("Digest item is not hex")?;
        DigestItem::decode_all(&mut bytes.as_slice()).context("Failed to decode digest item")
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DigestItem::Other(_) => "Other",
            DigestItem::Consensus { .. } => "Consensus",
            DigestItem::Seal { .. } => "Seal",
            DigestItem::PreRuntime { .. } => "PreRuntime",
            DigestItem::RuntimeEnvironmentUpdated => "RuntimeEnvironmentUpdated",
        }
    }

    /// Human form: `[engine, payload]` for engine items, `[payload]` for Other
    pub fn human(&self) -> Value {
        let payload = |data: &[u8]| format!("0x{}", hex::encode(data));
        match self {
            DigestItem::Other(data) => json!([payload(data)]),
            DigestItem::Consensus { engine, data }
            | DigestItem::Seal { engine, data }
            | DigestItem::PreRuntime { engine, data } => {
                json!([engine_name(engine), payload(data)])
            }
            DigestItem::RuntimeEnvironmentUpdated => json!([]),
        }
    }
}

fn engine_name(engine: &[u8; 4]) -> String {
    if engine.iter().all(|b| b.is_ascii_graphic()) {
        String::from_utf8_lossy(engine).into_owned()
    } else {
        format!("0x{}", hex::encode(engine))
    }
}

/// Decode header logs into rows; undecodable items keep their slot with an empty body
pub fn decode_logs(block_num: u64, logs: &[String]) -> Vec<LogRecord> {
    logs.iter()
        .enumerate()
        .map(|(index, log)| {
            let (log_type, data) = match DigestItem::parse(log) {
                Ok(item) => (item.type_name().to_string(), item.human()),
                Err(e) => {
                    tracing::debug!("Block {} digest item {} not decoded: {}", block_num, index, e);
                    ("Unknown".to_string(), json!([]))
                }
            };
            LogRecord {
                log_id: format!("{}-{}", block_num, index),
                block_num,
                log_type,
                data,
            }
        })
        .collect()
}

/// Block producer claim carried in the pre-runtime digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorClaim {
    /// BABE authority index into the session validator set
    Babe { authority_index: u32 },
    /// AURA slot; the author is `slot % validators`
    Aura { slot: u64 },
}

pub fn author_claim(logs: &[String]) -> Option<AuthorClaim> {
    logs.iter().find_map(|log| match DigestItem::parse(log).ok()? {
        DigestItem::PreRuntime { engine, data } => match &engine {
            b"BABE" => {
                // Pre-digest kind (primary / secondary plain / secondary VRF) leads
                let (_kind, authority_index) = <(u8, u32)>::decode(&mut data.as_slice()).ok()?;
                Some(AuthorClaim::Babe { authority_index })
            }
            b"aura" => {
                let slot = u64::decode(&mut data.as_slice()).ok()?;
                Some(AuthorClaim::Aura { slot })
            }
            _ => None,
        },
        _ => None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// BABE secondary-plain pre-digest for `authority_index` at `slot`
    pub(crate) fn babe_pre_digest(authority_index: u32, slot: u64) -> String {
        let mut payload = vec![0x02];
        payload.extend_from_slice(&authority_index.to_le_bytes());
        payload.extend_from_slice(&slot.to_le_bytes());
        // compact(13) = 13 << 2
        format!("0x06{}{:02x}{}", hex::encode(b"BABE"), 13 << 2, hex::encode(payload))
    }

    #[test]
    fn test_parse_aura_pre_runtime() {
        // Real digest log from a Midnight node
        let item = DigestItem::parse("0x066175726120778c911100000000").unwrap();
        assert_eq!(item.type_name(), "PreRuntime");
        assert_eq!(item.human(), json!(["aura", "0x778c911100000000"]));

        let claim = author_claim(&["0x066175726120778c911100000000".to_string()]);
        assert_eq!(claim, Some(AuthorClaim::Aura { slot: 294751351 }));
    }

    #[test]
    fn test_parse_babe_pre_runtime() {
        let log = babe_pre_digest(7, 1000);
        assert_eq!(
            author_claim(&[log]),
            Some(AuthorClaim::Babe { authority_index: 7 })
        );
    }

    #[test]
    fn test_seal_and_other_items() {
        let seal = format!("0x05{}0801ff", hex::encode(b"BABE"));
        let item = DigestItem::parse(&seal).unwrap();
        assert_eq!(item.type_name(), "Seal");
        assert_eq!(item.human(), json!(["BABE", "0x01ff"]));

        let other = DigestItem::parse("0x000c010203").unwrap();
        assert_eq!(other.human(), json!(["0x010203"]));

        assert_eq!(DigestItem::parse("0x08").unwrap().human(), json!([]));
    }

    #[test]
    fn test_rejects_malformed_items() {
        // Unknown variant
        assert!(DigestItem::parse("0x07").is_err());
        // Payload length runs past the end
        assert!(DigestItem::parse("0x000c01").is_err());
        // Trailing bytes after a complete item
        assert!(DigestItem::parse("0x0800").is_err());
    }

    #[test]
    fn test_decode_logs_keeps_undecodable_slots() {
        let logs = vec![
            "0x066175726120778c911100000000".to_string(),
            "0x0661757261".to_string(),
            "0xzz".to_string(),
        ];
        let rows = decode_logs(42, &logs);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].log_id, "42-0");
        assert_eq!(rows[0].log_type, "PreRuntime");
        assert_eq!(rows[1].log_type, "Unknown");
        assert_eq!(rows[1].data, json!([]));
        assert_eq!(rows[2].log_id, "42-2");
    }

    #[test]
    fn test_no_claim_without_pre_runtime() {
        let seal = format!("0x05{}0801ff", hex::encode(b"BABE"));
        assert_eq!(author_claim(&[seal]), None);
        assert_eq!(author_claim(&[]), None);
    }
}
