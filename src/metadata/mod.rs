//! Runtime metadata versions
//!
//! One [`ChainVersion`] exists per runtime spec version. It carries the module list of
//! that version, the cumulative union of all modules seen up to it (used to build filter
//! options for the explorer), and the raw metadata needed to resolve dispatch errors.

mod registry;
mod schema;

pub use registry::MetadataRegistry;
pub use schema::{ModuleIndex, RuntimeMetadata};
pub(crate) use schema::parse_index;

#[cfg(test)]
pub(crate) use schema::fixtures;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    /// A metadata generation the decoder does not understand. Continuing would
    /// mis-decode every following block.
    #[error("Unsupported metadata schema {0}")]
    UnsupportedSchema(String),

    #[error("Metadata type {0} not found in lookup registry")]
    MissingType(u32),

    #[error("Module with index {0} not found in metadata")]
    MissingModule(u32),

    #[error("Error {error} not found in module {module}")]
    MissingError { module: u32, error: u32 },

    #[error("Malformed metadata: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetadataError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MetadataError::UnsupportedSchema(_))
    }
}

/// True if any error in the chain is a fatal metadata error
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<MetadataError>()
            .map_or(false, MetadataError::is_fatal)
    })
}

/// Call, error and event names of one runtime module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainModule {
    pub name: String,
    pub calls: Vec<String>,
    pub errors: Vec<String>,
    pub events: Vec<String>,
}

/// Human-readable module error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub module: String,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ChainVersion {
    pub spec_version: u32,
    pub modules: Vec<ChainModule>,
    pub merged_modules: Vec<ChainModule>,
    pub raw_data: Value,
    metadata: RuntimeMetadata,
}

impl ChainVersion {
    /// Build a new version from raw metadata, merging modules onto `previous`
    pub fn new(
        spec_version: u32,
        raw_data: Value,
        previous: Option<&ChainVersion>,
    ) -> Result<Self, MetadataError> {
        let metadata = RuntimeMetadata::parse(&raw_data)?;
        let modules = metadata.modules()?;
        let merged_modules = match previous {
            Some(prev) => merge_modules(&prev.merged_modules, &modules),
            None => modules.clone(),
        };

        Ok(Self {
            spec_version,
            modules,
            merged_modules,
            raw_data,
            metadata,
        })
    }

    /// Rebuild a persisted version; the raw metadata is parsed again
    pub fn from_parts(
        spec_version: u32,
        modules: Vec<ChainModule>,
        merged_modules: Vec<ChainModule>,
        raw_data: Value,
    ) -> Result<Self, MetadataError> {
        let metadata = RuntimeMetadata::parse(&raw_data)?;
        Ok(Self {
            spec_version,
            modules,
            merged_modules,
            raw_data,
            metadata,
        })
    }

    pub fn metadata(&self) -> &RuntimeMetadata {
        &self.metadata
    }

    /// Resolve a module dispatch error against this version's metadata
    pub fn lookup_error(&self, module: u32, error: u32) -> Result<ErrorInfo, MetadataError> {
        self.metadata.resolve_error(module, error)
    }
}

/// Union of two module lists by name. Modules present on only one side pass through;
/// shared modules get the union of their name lists. Order is first-seen.
pub fn merge_modules(merged: &[ChainModule], modules: &[ChainModule]) -> Vec<ChainModule> {
    let names = union(
        merged.iter().map(|m| &m.name),
        modules.iter().map(|m| &m.name),
    );

    names
        .into_iter()
        .filter_map(|name| {
            let old = merged.iter().find(|m| m.name == name);
            let new = modules.iter().find(|m| m.name == name);
            match (old, new) {
                (Some(a), Some(b)) => Some(ChainModule {
                    calls: union(&a.calls, &b.calls),
                    errors: union(&a.errors, &b.errors),
                    events: union(&a.events, &b.events),
                    name,
                }),
                (Some(m), None) | (None, Some(m)) => Some(m.clone()),
                (None, None) => None,
            }
        })
        .collect()
}

fn union<'a>(
    a: impl IntoIterator<Item = &'a String>,
    b: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in a.into_iter().chain(b) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
