//! Event arguments and dispatch errors

use super::args::special_type;
use crate::chain::{value_to_string, Event};
use crate::metadata::{parse_index, ChainVersion, ErrorInfo};
use crate::types::ParsedArg;
use serde_json::Value;
use tracing::warn;

const DISPATCH_ERROR: &str = "DispatchError";

/// A dispatch error as reported by `system.ExtrinsicFailed` and friends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Module { index: u32, error: u32 },
    Other(String),
}

impl DispatchError {
    /// Read the human JSON form: `{"Module": {"index": .., "error": ..}}`, a bare
    /// variant name (`"BadOrigin"`) or a nested enum (`{"Token": "NoFunds"}`)
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(name) => DispatchError::Other(name.clone()),
            Value::Object(map) => {
                if let Some(module) = map.get("Module") {
                    let index = module.get("index").and_then(parse_index);
                    let error = module.get("error").and_then(module_error_index);
                    if let (Some(index), Some(error)) = (index, error) {
                        return DispatchError::Module { index, error };
                    }
                }
                // First value if it is a plain name, otherwise the variant key
                let name = match map.iter().next() {
                    Some((_, Value::String(inner))) => inner.clone(),
                    Some((key, _)) => key.clone(),
                    None => String::new(),
                };
                DispatchError::Other(name)
            }
            other => DispatchError::Other(value_to_string(other)),
        }
    }

    /// Resolve to a human error against the block's runtime version
    pub fn resolve(&self, version: &ChainVersion) -> ErrorInfo {
        match self {
            DispatchError::Module { index, error } => version
                .lookup_error(*index, *error)
                .unwrap_or_else(|e| {
                    warn!(
                        "Spec version {}: cannot resolve module error {}/{}: {}",
                        version.spec_version, index, error, e
                    );
                    ErrorInfo {
                        module: index.to_string(),
                        name: error.to_string(),
                        message: String::new(),
                    }
                }),
            DispatchError::Other(name) => ErrorInfo {
                module: String::new(),
                name: name.clone(),
                message: String::new(),
            },
        }
    }
}

/// Module error index: a number, or (newer runtimes) 4 raw bytes whose first byte is the index
fn module_error_index(value: &Value) -> Option<u32> {
    match value {
        Value::Array(bytes) => bytes.first().and_then(parse_index),
        Value::String(s) if s.starts_with("0x") => {
            let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
            bytes.first().map(|b| *b as u32)
        }
        other => parse_index(other),
    }
}

/// Parse event fields, resolving dispatch errors and failed dispatch results
pub fn parse_event_args(event: &Event, version: &ChainVersion) -> Vec<ParsedArg> {
    event
        .args
        .iter()
        .map(|arg| {
            let rendered = value_to_string(&arg.value);
            let special = special_type(arg.display_type(), &rendered);

            let mut type_name = arg.type_name.clone();
            let mut error_value = None;
            if type_name.starts_with(r#"{"_enum":{"Other":"Null""#) || type_name == DISPATCH_ERROR
            {
                type_name = DISPATCH_ERROR.to_string();
                error_value = Some(&arg.value);
            } else if arg.type_alias.as_deref() == Some("DispatchResult") {
                if let Some(err) = arg.value.get("Err") {
                    type_name = DISPATCH_ERROR.to_string();
                    error_value = Some(err);
                }
            }

            let value = match error_value {
                Some(err) => match DispatchError::from_value(err) {
                    module @ DispatchError::Module { .. } => {
                        serde_json::to_value(module.resolve(version))
                            .unwrap_or_else(|_| Value::String(value_to_string(err)))
                    }
                    DispatchError::Other(_) => Value::String(value_to_string(err)),
                },
                None => Value::String(rendered),
            };

            ParsedArg {
                name: arg.name.clone(),
                type_name,
                value,
                special_type: special.map(str::to_string),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::fixtures::lookup_v14;
    use serde_json::json;

    fn version() -> ChainVersion {
        ChainVersion::new(20, lookup_v14(), None).unwrap()
    }

    #[test]
    fn test_dispatch_error_shapes() {
        assert_eq!(
            DispatchError::from_value(&json!({"Module": {"index": "5", "error": "2"}})),
            DispatchError::Module { index: 5, error: 2 }
        );
        assert_eq!(
            DispatchError::from_value(&json!({"Module": {"index": 5, "error": "0x09000000"}})),
            DispatchError::Module { index: 5, error: 9 }
        );
        assert_eq!(
            DispatchError::from_value(&json!({"Module": {"index": 5, "error": [2, 0, 0, 0]}})),
            DispatchError::Module { index: 5, error: 2 }
        );
        assert_eq!(
            DispatchError::from_value(&json!("BadOrigin")),
            DispatchError::Other("BadOrigin".into())
        );
        assert_eq!(
            DispatchError::from_value(&json!({"Token": "NoFunds"})),
            DispatchError::Other("NoFunds".into())
        );
        assert_eq!(
            DispatchError::from_value(&json!({"Arithmetic": {"Underflow": null}})),
            DispatchError::Other("Arithmetic".into())
        );
    }

    #[test]
    fn test_resolve_module_error() {
        let info = DispatchError::Module { index: 5, error: 9 }.resolve(&version());
        assert_eq!(info.module, "Balances");
        assert_eq!(info.name, "TooManyHolds");

        // Unknown module falls back to raw indexes
        let info = DispatchError::Module { index: 77, error: 1 }.resolve(&version());
        assert_eq!(info.module, "77");
        assert_eq!(info.name, "1");
    }

    #[test]
    fn test_event_args_resolve_dispatch_result() {
        let event: Event = serde_json::from_value(json!({
            "section": "sudo", "method": "Sudid",
            "args": [{"name": "sudo_result", "type": "Result<(), DispatchError>",
                      "typeAlias": "DispatchResult",
                      "value": {"Err": {"Module": {"index": "5", "error": "0x09000000"}}}}]
        }))
        .unwrap();

        let args = parse_event_args(&event, &version());
        assert_eq!(args[0].type_name, "DispatchError");
        assert_eq!(args[0].value["name"], "TooManyHolds");
        assert_eq!(args[0].value["module"], "Balances");
    }

    #[test]
    fn test_event_args_ok_result_untouched() {
        let event: Event = serde_json::from_value(json!({
            "section": "sudo", "method": "Sudid",
            "args": [{"name": "sudo_result", "type": "Result<(), DispatchError>",
                      "typeAlias": "DispatchResult", "value": {"Ok": null}}]
        }))
        .unwrap();
        let args = parse_event_args(&event, &version());
        assert_eq!(args[0].type_name, "Result<(), DispatchError>");
        assert_eq!(args[0].value, json!(r#"{"Ok":null}"#));
    }

    #[test]
    fn test_event_args_special_types() {
        let event: Event = serde_json::from_value(json!({
            "section": "balances", "method": "Transfer",
            "args": [
                {"name": "from", "type": "AccountId32", "typeAlias": "T::AccountId",
                 "value": "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"},
                {"name": "amount", "type": "u128", "typeAlias": "T::Balance", "value": "1000"}
            ]
        }))
        .unwrap();
        let args = parse_event_args(&event, &version());
        assert_eq!(args[0].special_type.as_deref(), Some("AccountId"));
        assert_eq!(args[1].special_type.as_deref(), Some("Balance"));
        assert_eq!(args[1].value, json!("1000"));
    }
}
