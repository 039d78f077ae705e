//! Scanner commands

pub mod config;
pub mod reindex;
pub mod status;
pub mod sync;

pub use config::ConfigArgs;
pub use reindex::ReindexArgs;
pub use status::StatusArgs;
pub use sync::SyncArgs;
