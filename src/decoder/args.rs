//! Call argument parsing
//!
//! Arguments are dispatched on their declared type into a closed set of shapes. Nested
//! calls recurse with no depth limit; every call reached is recorded in the extrinsic's
//! `calls` set.

use super::DecodeError;
use crate::chain::{value_to_string, Call, TypedArg};
use crate::types::{BlobRecord, ParsedArg, ParsedCall};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub const SPECIAL_BALANCE: &str = "Balance";
pub const SPECIAL_BLOCK_NUMBER: &str = "BlockNumber";
pub const SPECIAL_ACCOUNT_ID: &str = "AccountId";
pub const SPECIAL_BLOB: &str = "Blob";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgShape {
    Call,
    CallList,
    Bytes,
    Scalar,
}

impl ArgShape {
    fn of(type_name: &str) -> Self {
        match type_name {
            "Call" | "RuntimeCall" | "Box<Call>" | "Box<RuntimeCall>" => ArgShape::Call,
            "Vec<Call>" | "Vec<RuntimeCall>" => ArgShape::CallList,
            "Bytes" | "Vec<u8>" => ArgShape::Bytes,
            _ => ArgShape::Scalar,
        }
    }
}

/// Oversized payloads split out of one block, deduplicated by content hash
#[derive(Debug)]
pub struct BlobStage {
    block_num: u64,
    min_size: usize,
    seen: HashSet<String>,
    blobs: Vec<BlobRecord>,
}

impl BlobStage {
    pub fn new(block_num: u64, min_size: usize) -> Self {
        Self {
            block_num,
            min_size,
            seen: HashSet::new(),
            blobs: Vec::new(),
        }
    }

    /// Stage `data` if it exceeds the threshold and return its content hash
    fn stage(&mut self, data: Vec<u8>) -> Option<String> {
        if data.len() <= self.min_size {
            return None;
        }
        let hash = hex::encode(Sha256::digest(&data));
        if self.seen.insert(hash.clone()) {
            self.blobs.push(BlobRecord {
                hash: hash.clone(),
                block_num: self.block_num,
                data,
            });
        }
        Some(hash)
    }

    pub fn into_records(self) -> Vec<BlobRecord> {
        self.blobs
    }
}

/// Per-extrinsic parse state
pub struct CallContext<'a> {
    calls: Vec<String>,
    blobs: &'a mut BlobStage,
}

impl<'a> CallContext<'a> {
    pub fn new(blobs: &'a mut BlobStage) -> Self {
        Self {
            calls: Vec::new(),
            blobs,
        }
    }

    fn record_call(&mut self, section: &str, method: &str) {
        let name = format!("{}.{}", section, method);
        if !self.calls.contains(&name) {
            self.calls.push(name);
        }
    }

    /// Every `section.method` reached, in first-seen order
    pub fn into_calls(self) -> Vec<String> {
        self.calls
    }
}

pub fn parse_call(call: &Call, ctx: &mut CallContext<'_>) -> Result<ParsedCall, DecodeError> {
    ctx.record_call(&call.section, &call.method);
    let args = call
        .args
        .iter()
        .map(|arg| parse_arg(arg, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ParsedCall {
        section: call.section.clone(),
        method: call.method.clone(),
        args,
    })
}

fn nested_call(value: &Value, arg: &TypedArg) -> Result<Call, DecodeError> {
    serde_json::from_value(value.clone()).map_err(|e| DecodeError::MalformedCall {
        call: arg.name.clone(),
        reason: format!("nested {} is not a call: {}", arg.type_name, e),
    })
}

fn parse_arg(arg: &TypedArg, ctx: &mut CallContext<'_>) -> Result<ParsedArg, DecodeError> {
    let rendered = value_to_string(&arg.value);
    let mut special_type = special_type(arg.display_type(), &rendered);

    let value = match ArgShape::of(&arg.type_name) {
        ArgShape::Call => {
            let call = nested_call(&arg.value, arg)?;
            serde_json::to_value(parse_call(&call, ctx)?)?
        }
        ArgShape::CallList => {
            let items = arg.value.as_array().ok_or_else(|| DecodeError::MalformedCall {
                call: arg.name.clone(),
                reason: format!("{} is not a list", arg.type_name),
            })?;
            let mut parsed = Vec::with_capacity(items.len());
            for item in items {
                let call = nested_call(item, arg)?;
                parsed.push(serde_json::to_value(parse_call(&call, ctx)?)?);
            }
            Value::Array(parsed)
        }
        ArgShape::Bytes => match ctx.blobs.stage(bytes_of(&rendered)) {
            Some(hash) => {
                special_type = Some(SPECIAL_BLOB);
                Value::String(hash)
            }
            None => Value::String(rendered),
        },
        ArgShape::Scalar => Value::String(rendered),
    };

    Ok(ParsedArg {
        name: arg.name.clone(),
        type_name: arg.type_name.clone(),
        value,
        special_type: special_type.map(str::to_string),
    })
}

/// Raw bytes of a `Bytes` value: hex when it looks like hex, otherwise the text itself
fn bytes_of(rendered: &str) -> Vec<u8> {
    rendered
        .strip_prefix("0x")
        .and_then(|h| hex::decode(h).ok())
        .unwrap_or_else(|| rendered.as_bytes().to_vec())
}

/// Strip `Compact<..>`, `Box<..>`, `T::` and `<T as Trait>::` decorations
fn strip_wrappers(type_name: &str) -> &str {
    let mut t = type_name.trim();
    loop {
        let before = t;
        for wrapper in ["Compact<", "Box<", "Option<"] {
            if let Some(inner) = t.strip_prefix(wrapper).and_then(|s| s.strip_suffix('>')) {
                t = inner.trim();
            }
        }
        if let Some(pos) = t.rfind(">::") {
            if t.starts_with('<') {
                t = &t[pos + 3..];
            }
        }
        if let Some(rest) = t.strip_prefix("T::") {
            t = rest;
        }
        if t == before {
            return t;
        }
    }
}

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn is_account_id(value: &str) -> bool {
    let ss58 = (46..=48).contains(&value.len())
        && value.chars().all(|c| BASE58_ALPHABET.contains(c));
    let raw = value.len() == 66
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit());
    ss58 || raw
}

/// The value renders back to itself as an integer of the given width
fn is_canonical<T: std::str::FromStr + ToString>(value: &str) -> bool {
    value
        .parse::<T>()
        .map(|v| v.to_string() == value)
        .unwrap_or(false)
}

/// Classify an argument for the explorer's renderers
///
/// The declared type decides which check applies; the value must pass it.
pub fn special_type(type_name: &str, value: &str) -> Option<&'static str> {
    let t = strip_wrappers(type_name);
    if t.contains("Balance") {
        is_canonical::<u128>(value).then_some(SPECIAL_BALANCE)
    } else if t.contains("BlockNumber") {
        is_canonical::<u32>(value).then_some(SPECIAL_BLOCK_NUMBER)
    } else if t.contains("AccountId") || t.contains("Address") {
        is_account_id(value).then_some(SPECIAL_ACCOUNT_ID)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

    fn call(value: Value) -> Call {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_special_type_classifier() {
        assert_eq!(special_type("Compact<T::Balance>", "1000"), Some("Balance"));
        assert_eq!(special_type("BalanceOf<T>", "1,000"), None);
        assert_eq!(special_type("T::BlockNumber", "42"), Some("BlockNumber"));
        assert_eq!(special_type("BlockNumberFor<T>", "4294967296"), None);
        assert_eq!(special_type("<T::Lookup as StaticLookup>::Source", ALICE), None);
        assert_eq!(special_type("AccountIdLookupOf<T>", ALICE), Some("AccountId"));
        assert_eq!(special_type("MultiAddress", ALICE), Some("AccountId"));
        assert_eq!(
            special_type("T::AccountId", &format!("0x{}", "ab".repeat(32))),
            Some("AccountId")
        );
        assert_eq!(special_type("AccountId", "not-an-account"), None);
        assert_eq!(special_type("u32", "42"), None);
        assert_eq!(special_type("Balance", "007"), None);
    }

    #[test]
    fn test_strip_wrappers() {
        assert_eq!(strip_wrappers("Compact<T::Balance>"), "Balance");
        assert_eq!(strip_wrappers("<T as frame_system::Config>::BlockNumber"), "BlockNumber");
        assert_eq!(strip_wrappers("Box<Compact<u32>>"), "u32");
    }

    #[test]
    fn test_recursive_call_flattening() {
        // utility.batch([balances.transfer(...), utility.batch([system.remark(...)])])
        let batch = call(json!({
            "section": "utility", "method": "batch",
            "args": [{"name": "calls", "type": "Vec<Call>", "value": [
                {"section": "balances", "method": "transfer", "args": [
                    {"name": "dest", "type": "MultiAddress", "value": ALICE},
                    {"name": "value", "type": "Compact<u128>", "typeAlias": "T::Balance", "value": "500"}
                ]},
                {"section": "utility", "method": "batch", "args": [
                    {"name": "calls", "type": "Vec<Call>", "value": [
                        {"section": "system", "method": "remark", "args": [
                            {"name": "remark", "type": "Bytes", "value": "0x0102"}
                        ]}
                    ]}
                ]}
            ]}]
        }));

        let mut blobs = BlobStage::new(1, 64);
        let mut ctx = CallContext::new(&mut blobs);
        let parsed = parse_call(&batch, &mut ctx).unwrap();
        let calls = ctx.into_calls();

        assert_eq!(
            calls,
            vec!["utility.batch", "balances.transfer", "system.remark"]
        );
        let inner = parsed.args[0].value.as_array().unwrap();
        assert_eq!(inner[0]["method"], "transfer");
        assert_eq!(inner[0]["args"][1]["specialType"], "Balance");
        assert_eq!(inner[0]["args"][0]["specialType"], "AccountId");
        assert_eq!(inner[1]["args"][0]["value"][0]["args"][0]["value"], "0x0102");
        assert!(blobs.into_records().is_empty());
    }

    #[test]
    fn test_single_nested_call() {
        let sudo = call(json!({
            "section": "sudo", "method": "sudo",
            "args": [{"name": "call", "type": "Call", "value":
                {"section": "system", "method": "setCode", "args": []}}]
        }));
        let mut blobs = BlobStage::new(1, 64);
        let mut ctx = CallContext::new(&mut blobs);
        let parsed = parse_call(&sudo, &mut ctx).unwrap();
        assert_eq!(ctx.into_calls(), vec!["sudo.sudo", "system.setCode"]);
        assert_eq!(parsed.args[0].value["section"], "system");
    }

    #[test]
    fn test_malformed_nested_call() {
        let bad = call(json!({
            "section": "sudo", "method": "sudo",
            "args": [{"name": "call", "type": "Call", "value": "0x00"}]
        }));
        let mut blobs = BlobStage::new(1, 64);
        let mut ctx = CallContext::new(&mut blobs);
        assert!(matches!(
            parse_call(&bad, &mut ctx),
            Err(DecodeError::MalformedCall { .. })
        ));
    }

    #[test]
    fn test_oversized_bytes_become_blobs() {
        let code = format!("0x{}", "ab".repeat(100));
        let set_code = call(json!({
            "section": "system", "method": "setCode",
            "args": [{"name": "code", "type": "Bytes", "value": code}]
        }));
        let remark = call(json!({
            "section": "system", "method": "remark",
            "args": [{"name": "remark", "type": "Bytes", "value": code}]
        }));

        let mut blobs = BlobStage::new(9, 64);
        let first = parse_call(&set_code, &mut CallContext::new(&mut blobs)).unwrap();
        let second = parse_call(&remark, &mut CallContext::new(&mut blobs)).unwrap();

        let expected = hex::encode(Sha256::digest(vec![0xab; 100]));
        assert_eq!(first.args[0].value, json!(expected));
        assert_eq!(first.args[0].special_type.as_deref(), Some("Blob"));
        assert_eq!(second.args[0].value, json!(expected));

        let records = blobs.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].block_num, 9);
        assert_eq!(records[0].data.len(), 100);
    }

    #[test]
    fn test_bytes_at_threshold_stay_inline() {
        let exact = format!("0x{}", "cd".repeat(64));
        let remark = call(json!({
            "section": "system", "method": "remark",
            "args": [{"name": "remark", "type": "Bytes", "value": exact}]
        }));
        let mut blobs = BlobStage::new(1, 64);
        let parsed = parse_call(&remark, &mut CallContext::new(&mut blobs)).unwrap();
        assert_eq!(parsed.args[0].value, json!(exact));
        assert!(parsed.args[0].special_type.is_none());
        assert!(blobs.into_records().is_empty());
    }
}
