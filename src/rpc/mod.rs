//! JSON-RPC transport for Substrate nodes

mod client;
mod types;

pub use client::{RetryConfig, RpcClient};
pub use types::*;
