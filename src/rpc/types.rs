use serde::{Deserialize, Deserializer};

/// Response from system_health RPC call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub peers: u32,
    pub is_syncing: bool,
    pub should_have_peers: bool,
}

/// Response from chain_getHeader RPC call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: String,
    pub number: String,
    pub state_root: String,
    pub extrinsics_root: String,
    pub digest: Option<Digest>,
}

impl BlockHeader {
    pub fn block_number(&self) -> u64 {
        parse_hex_number(&self.number).unwrap_or(0)
    }

    /// Hex-encoded digest items, empty when the node omitted the digest
    pub fn digest_logs(&self) -> &[String] {
        self.digest.as_ref().map(|d| d.logs.as_slice()).unwrap_or(&[])
    }
}

/// Block digest containing consensus logs
#[derive(Debug, Clone, Deserialize)]
pub struct Digest {
    pub logs: Vec<String>,
}

/// Response from chain_getBlock RPC call
#[derive(Debug, Clone, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
}

/// Block structure with SCALE hex-encoded extrinsics
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub extrinsics: Vec<String>,
}

/// Response from state_getRuntimeVersion RPC call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    pub spec_name: String,
    pub spec_version: u32,
    #[serde(default)]
    pub transaction_version: u32,
}

/// Response from payment_queryInfo RPC call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeDetails {
    #[serde(deserialize_with = "u128_from_any")]
    pub partial_fee: u128,
}

/// Parse a hex string (with or without 0x prefix) to u64
pub fn parse_hex_number(s: &str) -> Option<u64> {
    let hex_str = s.trim_start_matches("0x");
    u64::from_str_radix(hex_str, 16).ok()
}

/// Nodes report balances either as JSON numbers, decimal strings or hex strings
fn u128_from_any<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_u64().map(u128::from),
        serde_json::Value::String(s) if s.starts_with("0x") => {
            u128::from_str_radix(s.trim_start_matches("0x"), 16).ok()
        }
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid balance value: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_number() {
        assert_eq!(parse_hex_number("0x332534"), Some(3351860));
        assert_eq!(parse_hex_number("0x0"), Some(0));
        assert_eq!(parse_hex_number("332534"), Some(3351860));
        assert_eq!(parse_hex_number("0x1"), Some(1));
    }

    #[test]
    fn test_fee_details_formats() {
        let a: FeeDetails = serde_json::from_str(r#"{"partialFee":"125000000"}"#).unwrap();
        let b: FeeDetails = serde_json::from_str(r#"{"partialFee":125000000}"#).unwrap();
        let c: FeeDetails = serde_json::from_str(r#"{"partialFee":"0x773594"}"#).unwrap();
        assert_eq!(a.partial_fee, 125_000_000);
        assert_eq!(b.partial_fee, 125_000_000);
        assert_eq!(c.partial_fee, 0x773594);
    }

    #[test]
    fn test_header_digest_logs() {
        let header: BlockHeader = serde_json::from_str(
            r#"{"parentHash":"0x01","number":"0x64","stateRoot":"0x02","extrinsicsRoot":"0x03",
                "digest":{"logs":["0x0661757261"]}}"#,
        )
        .unwrap();
        assert_eq!(header.block_number(), 100);
        assert_eq!(header.digest_logs().len(), 1);
    }
}
