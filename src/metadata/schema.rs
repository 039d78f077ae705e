//! Runtime metadata shapes
//!
//! Metadata arrives in its human-readable JSON form, tagged by schema generation:
//!
//! - flat form (`V12`, `V13`): every module lists its calls, events and errors by name
//! - lookup form (`V14`, `V15`): pallets reference type ids; names are the variant names
//!   of those types in the shared `lookup.types` registry
//!
//! Numbers in the human form are frequently strings with thousands separators
//! (`"1,024"`), so every index goes through [`de_index`].

use super::{ChainModule, ErrorInfo, MetadataError};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

/// Name-level view over one metadata generation
pub trait ModuleIndex {
    /// Module indices in declaration order
    fn module_indices(&self) -> Vec<u32>;

    fn module_name(&self, module: u32) -> Option<&str>;

    fn call_names(&self, module: u32) -> Result<Vec<String>, MetadataError>;

    fn event_names(&self, module: u32) -> Result<Vec<String>, MetadataError>;

    fn error_names(&self, module: u32) -> Result<Vec<String>, MetadataError>;

    /// Resolve a `DispatchError::Module` pair to a human error
    fn resolve_error(&self, module: u32, error: u32) -> Result<ErrorInfo, MetadataError>;

    /// Flattened module list in declaration order
    fn modules(&self) -> Result<Vec<ChainModule>, MetadataError> {
        self.module_indices()
            .into_iter()
            .map(|idx| {
                Ok(ChainModule {
                    name: self.module_name(idx).unwrap_or_default().to_string(),
                    calls: self.call_names(idx)?,
                    errors: self.error_names(idx)?,
                    events: self.event_names(idx)?,
                })
            })
            .collect()
    }
}

/// Parsed runtime metadata, one variant per supported schema generation
#[derive(Debug, Clone)]
pub enum RuntimeMetadata {
    Flat(FlatMetadata),
    Lookup(LookupMetadata),
}

impl RuntimeMetadata {
    /// Parse tagged human-form metadata.
    ///
    /// Accepts either the bare tagged object (`{"V14": {...}}`) or the prefixed form
    /// (`{"magicNumber": ..., "metadata": {"V14": {...}}}`).
    pub fn parse(raw: &Value) -> Result<Self, MetadataError> {
        let tagged = raw.get("metadata").unwrap_or(raw);
        let (tag, body) = tagged
            .as_object()
            .and_then(|obj| obj.iter().next())
            .ok_or_else(|| MetadataError::UnsupportedSchema("<missing tag>".to_string()))?;

        match tag.to_ascii_uppercase().as_str() {
            "V12" | "V13" => Ok(Self::Flat(FlatMetadata::deserialize(body)?)),
            "V14" | "V15" => Ok(Self::Lookup(LookupMetadata::from_raw(
                RawLookupMetadata::deserialize(body)?,
            )?)),
            _ => Err(MetadataError::UnsupportedSchema(tag.clone())),
        }
    }

    pub fn schema(&self) -> &'static str {
        match self {
            Self::Flat(_) => "flat",
            Self::Lookup(_) => "lookup",
        }
    }

    fn index(&self) -> &dyn ModuleIndex {
        match self {
            Self::Flat(meta) => meta,
            Self::Lookup(meta) => meta,
        }
    }
}

impl ModuleIndex for RuntimeMetadata {
    fn module_indices(&self) -> Vec<u32> {
        self.index().module_indices()
    }

    fn module_name(&self, module: u32) -> Option<&str> {
        self.index().module_name(module)
    }

    fn call_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        self.index().call_names(module)
    }

    fn event_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        self.index().event_names(module)
    }

    fn error_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        self.index().error_names(module)
    }

    fn resolve_error(&self, module: u32, error: u32) -> Result<ErrorInfo, MetadataError> {
        self.index().resolve_error(module, error)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlatMetadata {
    #[serde(default)]
    modules: Vec<FlatModule>,
}

#[derive(Debug, Clone, Deserialize)]
struct FlatModule {
    name: String,
    #[serde(deserialize_with = "de_index")]
    index: u32,
    #[serde(default)]
    calls: Option<Vec<NamedItem>>,
    #[serde(default)]
    events: Option<Vec<NamedItem>>,
    #[serde(default)]
    errors: Option<Vec<NamedItem>>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedItem {
    name: String,
    #[serde(default)]
    docs: Vec<String>,
}

impl FlatMetadata {
    fn module(&self, index: u32) -> Result<&FlatModule, MetadataError> {
        self.modules
            .iter()
            .find(|m| m.index == index)
            .ok_or(MetadataError::MissingModule(index))
    }
}

fn names(items: &Option<Vec<NamedItem>>) -> Vec<String> {
    items
        .as_ref()
        .map(|items| items.iter().map(|i| i.name.clone()).collect())
        .unwrap_or_default()
}

impl ModuleIndex for FlatMetadata {
    fn module_indices(&self) -> Vec<u32> {
        self.modules.iter().map(|m| m.index).collect()
    }

    fn module_name(&self, module: u32) -> Option<&str> {
        self.module(module).ok().map(|m| m.name.as_str())
    }

    fn call_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        Ok(names(&self.module(module)?.calls))
    }

    fn event_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        Ok(names(&self.module(module)?.events))
    }

    fn error_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        Ok(names(&self.module(module)?.errors))
    }

    fn resolve_error(&self, module: u32, error: u32) -> Result<ErrorInfo, MetadataError> {
        let m = self.module(module)?;
        // Flat errors are positional
        let item = m
            .errors
            .as_ref()
            .and_then(|errors| errors.get(error as usize))
            .ok_or(MetadataError::MissingError { module, error })?;
        Ok(ErrorInfo {
            module: m.name.clone(),
            name: item.name.clone(),
            message: item.docs.join("").trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawLookupMetadata {
    lookup: RawRegistry,
    #[serde(default)]
    pallets: Vec<Pallet>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRegistry {
    #[serde(default)]
    types: Vec<RawType>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawType {
    #[serde(deserialize_with = "de_index")]
    id: u32,
    #[serde(rename = "type")]
    ty: RawTypeInfo,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTypeInfo {
    #[serde(default)]
    def: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct Pallet {
    name: String,
    #[serde(deserialize_with = "de_index")]
    index: u32,
    #[serde(default)]
    calls: Option<TypeRef>,
    #[serde(default)]
    events: Option<TypeRef>,
    #[serde(default)]
    errors: Option<TypeRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct TypeRef {
    #[serde(rename = "type", deserialize_with = "de_index")]
    ty: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct Variant {
    name: String,
    #[serde(deserialize_with = "de_index")]
    index: u32,
    #[serde(default)]
    docs: Vec<String>,
}

/// Lookup-form metadata with the variant types of the registry indexed by id
#[derive(Debug, Clone)]
pub struct LookupMetadata {
    pallets: Vec<Pallet>,
    variants: HashMap<u32, Vec<Variant>>,
}

impl LookupMetadata {
    fn from_raw(raw: RawLookupMetadata) -> Result<Self, MetadataError> {
        let mut variants = HashMap::new();
        for ty in raw.lookup.types {
            if let Some(list) = ty.ty.def.get("Variant").and_then(|v| v.get("variants")) {
                let list = Vec::<Variant>::deserialize(list)?;
                variants.insert(ty.id, list);
            }
        }
        Ok(Self {
            pallets: raw.pallets,
            variants,
        })
    }

    fn pallet(&self, index: u32) -> Result<&Pallet, MetadataError> {
        self.pallets
            .iter()
            .find(|p| p.index == index)
            .ok_or(MetadataError::MissingModule(index))
    }

    fn variants_of(&self, type_ref: &Option<TypeRef>) -> Result<&[Variant], MetadataError> {
        match type_ref {
            None => Ok(&[]),
            Some(r) => self
                .variants
                .get(&r.ty)
                .map(|v| v.as_slice())
                .ok_or(MetadataError::MissingType(r.ty)),
        }
    }

    fn variant_names(&self, type_ref: &Option<TypeRef>) -> Result<Vec<String>, MetadataError> {
        Ok(self
            .variants_of(type_ref)?
            .iter()
            .map(|v| v.name.clone())
            .collect())
    }
}

impl ModuleIndex for LookupMetadata {
    fn module_indices(&self) -> Vec<u32> {
        self.pallets.iter().map(|p| p.index).collect()
    }

    fn module_name(&self, module: u32) -> Option<&str> {
        self.pallet(module).ok().map(|p| p.name.as_str())
    }

    fn call_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        self.variant_names(&self.pallet(module)?.calls)
    }

    fn event_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        self.variant_names(&self.pallet(module)?.events)
    }

    fn error_names(&self, module: u32) -> Result<Vec<String>, MetadataError> {
        self.variant_names(&self.pallet(module)?.errors)
    }

    fn resolve_error(&self, module: u32, error: u32) -> Result<ErrorInfo, MetadataError> {
        let pallet = self.pallet(module)?;
        let variant = self
            .variants_of(&pallet.errors)?
            .iter()
            .find(|v| v.index == error)
            .ok_or(MetadataError::MissingError { module, error })?;
        Ok(ErrorInfo {
            module: pallet.name.clone(),
            name: variant.name.clone(),
            message: variant.docs.join("").trim().to_string(),
        })
    }
}

/// Index that may be a JSON number or a string such as `"1,024"`
fn de_index<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_index(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid metadata index: {}", value)))
}

pub(crate) fn parse_index(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    /// Flat-form metadata with `System` (0) and `Balances` (5)
    pub fn flat_v13() -> Value {
        json!({
            "V13": {
                "modules": [
                    {
                        "name": "System",
                        "index": "0",
                        "calls": [{"name": "remark", "args": [], "docs": []}],
                        "events": [
                            {"name": "ExtrinsicSuccess", "args": [], "docs": []},
                            {"name": "ExtrinsicFailed", "args": [], "docs": []}
                        ],
                        "errors": [{"name": "InvalidSpecName", "docs": []}]
                    },
                    {
                        "name": "Balances",
                        "index": "5",
                        "calls": [
                            {"name": "transfer", "args": [], "docs": []},
                            {"name": "transfer_keep_alive", "args": [], "docs": []}
                        ],
                        "events": [{"name": "Transfer", "args": [], "docs": []}],
                        "errors": [
                            {"name": "VestingBalance", "docs": [" Vesting balance too high"]},
                            {"name": "InsufficientBalance", "docs": [" Balance too low", " to send value"]}
                        ]
                    }
                ]
            }
        })
    }

    /// Lookup-form metadata; Balances gains `transfer_all` and a new error
    pub fn lookup_v14() -> Value {
        json!({
            "magicNumber": "1,635,018,093",
            "metadata": {
                "V14": {
                    "lookup": {
                        "types": [
                            {"id": "10", "type": {"path": [], "params": [], "def": {"Primitive": "U32"}, "docs": []}},
                            {"id": "20", "type": {"def": {"Variant": {"variants": [
                                {"name": "remark", "fields": [], "index": "0", "docs": []}
                            ]}}}},
                            {"id": "21", "type": {"def": {"Variant": {"variants": [
                                {"name": "ExtrinsicSuccess", "fields": [], "index": "0", "docs": []},
                                {"name": "ExtrinsicFailed", "fields": [], "index": "1", "docs": []}
                            ]}}}},
                            {"id": "1,030", "type": {"def": {"Variant": {"variants": [
                                {"name": "transfer", "fields": [], "index": "0", "docs": []},
                                {"name": "transfer_keep_alive", "fields": [], "index": "3", "docs": []},
                                {"name": "transfer_all", "fields": [], "index": "4", "docs": []}
                            ]}}}},
                            {"id": "1,031", "type": {"def": {"Variant": {"variants": [
                                {"name": "VestingBalance", "fields": [], "index": "0", "docs": ["Vesting balance too high"]},
                                {"name": "InsufficientBalance", "fields": [], "index": "2", "docs": ["Balance too low ", "to send value"]},
                                {"name": "TooManyHolds", "fields": [], "index": "9", "docs": []}
                            ]}}}}
                        ]
                    },
                    "pallets": [
                        {"name": "System", "index": "0", "calls": {"type": "20"}, "events": {"type": "21"}, "errors": null},
                        {"name": "Balances", "index": "5", "calls": {"type": "1,030"}, "events": null, "errors": {"type": "1,031"}},
                        {"name": "Sudo", "index": "9", "calls": null, "events": null, "errors": null}
                    ]
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_flat_metadata() {
        let meta = RuntimeMetadata::parse(&flat_v13()).unwrap();
        assert_eq!(meta.schema(), "flat");

        let modules = meta.modules().unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[1].name, "Balances");
        assert_eq!(modules[1].calls, vec!["transfer", "transfer_keep_alive"]);
        assert_eq!(modules[1].errors.len(), 2);
    }

    #[test]
    fn test_parse_lookup_metadata() {
        let meta = RuntimeMetadata::parse(&lookup_v14()).unwrap();
        assert_eq!(meta.schema(), "lookup");

        let modules = meta.modules().unwrap();
        assert_eq!(modules.len(), 3);
        assert_eq!(modules[0].events, vec!["ExtrinsicSuccess", "ExtrinsicFailed"]);
        assert!(modules[0].errors.is_empty());
        assert_eq!(
            modules[1].calls,
            vec!["transfer", "transfer_keep_alive", "transfer_all"]
        );
        assert!(modules[2].calls.is_empty());
    }

    #[test]
    fn test_resolve_error_flat_is_positional() {
        let meta = RuntimeMetadata::parse(&flat_v13()).unwrap();
        let err = meta.resolve_error(5, 1).unwrap();
        assert_eq!(err.module, "Balances");
        assert_eq!(err.name, "InsufficientBalance");
        assert_eq!(err.message, "Balance too low to send value");
    }

    #[test]
    fn test_resolve_error_lookup_by_variant_index() {
        let meta = RuntimeMetadata::parse(&lookup_v14()).unwrap();
        let err = meta.resolve_error(5, 2).unwrap();
        assert_eq!(err.name, "InsufficientBalance");
        assert_eq!(err.message, "Balance too low to send value");

        assert!(matches!(
            meta.resolve_error(5, 1),
            Err(MetadataError::MissingError { module: 5, error: 1 })
        ));
        assert!(matches!(
            meta.resolve_error(42, 0),
            Err(MetadataError::MissingModule(42))
        ));
    }

    #[test]
    fn test_unsupported_schema_tag() {
        let err = RuntimeMetadata::parse(&json!({"V9": {"modules": []}})).unwrap_err();
        assert!(matches!(err, MetadataError::UnsupportedSchema(ref tag) if tag == "V9"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_lookup_type() {
        let raw = json!({"V14": {
            "lookup": {"types": []},
            "pallets": [{"name": "Balances", "index": 5, "calls": {"type": 7}}]
        }});
        let meta = RuntimeMetadata::parse(&raw).unwrap();
        assert!(matches!(meta.modules(), Err(MetadataError::MissingType(7))));
    }

    #[test]
    fn test_parse_index_formats() {
        assert_eq!(parse_index(&json!("1,030")), Some(1030));
        assert_eq!(parse_index(&json!(12)), Some(12));
        assert_eq!(parse_index(&json!(null)), None);
    }
}
