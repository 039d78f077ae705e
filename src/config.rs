//! Configuration management for the scanner

use crate::decoder::DecodeOptions;
use crate::sync::SyncOptions;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Node JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Decoding gateway serving `decoder_*` methods (defaults to the node endpoint)
    #[serde(default)]
    pub decoder_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Maximum retry attempts for transient failures (0 = no retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Blocks decoded in parallel during backfill
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Blocks per backfill / gap repair window
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Byte arguments longer than this are stored as blobs
    #[serde(default = "default_min_blob_size")]
    pub min_blob_size: usize,

    #[serde(default)]
    pub start_block: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_queue_backoff")]
    pub queue_backoff_ms: u64,

    #[serde(default = "default_block_timeout")]
    pub block_timeout_secs: u64,

    /// How long a decoder waits on another's metadata load before taking over
    #[serde(default = "default_metadata_wait")]
    pub metadata_wait_secs: u64,

    /// Sessions of validator sets kept in memory
    #[serde(default = "default_session_cache_depth")]
    pub session_cache_depth: u32,
}

// Default values
fn default_rpc_url() -> String {
    "http://localhost:9944".to_string()
}

fn default_timeout() -> u64 {
    30000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_delay() -> u64 {
    1000 // 1 second
}

fn default_retry_max_delay() -> u64 {
    30000 // 30 seconds
}

fn default_db_path() -> String {
    "./scanner.db".to_string()
}

fn default_concurrency() -> usize {
    10
}

fn default_batch_size() -> u64 {
    5000
}

fn default_min_blob_size() -> usize {
    65536
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_queue_backoff() -> u64 {
    1000
}

fn default_block_timeout() -> u64 {
    90
}

fn default_metadata_wait() -> u64 {
    30
}

fn default_session_cache_depth() -> u32 {
    3
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            decoder_url: None,
            timeout_ms: default_timeout(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl RpcConfig {
    /// Convert to RetryConfig for use with RpcClient
    pub fn retry_config(&self) -> crate::rpc::RetryConfig {
        crate::rpc::RetryConfig {
            max_retries: self.max_retries,
            initial_delay_ms: self.retry_initial_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }

    pub fn decoder_url(&self) -> &str {
        self.decoder_url.as_deref().unwrap_or(&self.url)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            min_blob_size: default_min_blob_size(),
            start_block: 0,
            poll_interval_ms: default_poll_interval(),
            queue_backoff_ms: default_queue_backoff(),
            block_timeout_secs: default_block_timeout(),
            metadata_wait_secs: default_metadata_wait(),
            session_cache_depth: default_session_cache_depth(),
        }
    }
}

impl SyncConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.concurrency,
            batch_size: self.batch_size,
            start_block: self.start_block,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            queue_backoff: Duration::from_millis(self.queue_backoff_ms),
            block_timeout: Duration::from_secs(self.block_timeout_secs),
            decode: DecodeOptions {
                min_blob_size: self.min_blob_size,
            },
        }
    }

    pub fn metadata_wait(&self) -> Duration {
        Duration::from_secs(self.metadata_wait_secs)
    }
}

impl Config {
    /// Load configuration from file, environment, and defaults
    /// Priority: Environment variables > Config file > Defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file (multiple locations)
        if let Some((file_config, config_path)) = Self::load_from_file()? {
            tracing::info!("Loaded configuration from: {}", config_path.display());
            config = file_config;
        } else {
            tracing::info!("Using default configuration (no config file found)");
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Load configuration from file (searches multiple locations)
    fn load_from_file() -> Result<Option<(Self, PathBuf)>> {
        for path in &Self::config_file_paths() {
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

                let config = Self::from_toml(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

                return Ok(Some((config, path.clone())));
            }
        }

        Ok(None)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Get list of config file paths to search (in order of priority)
    pub fn config_file_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Current directory
        paths.push(PathBuf::from("./scanner.toml"));

        // 2. User config directory (~/.config/chain-scanner/config.toml)
        if let Some(proj_dirs) = ProjectDirs::from("", "", "chain-scanner") {
            paths.push(proj_dirs.config_dir().join("config.toml"));
        }

        // 3. System-wide
        paths.push(PathBuf::from("/etc/chain-scanner/config.toml"));

        paths
    }

    pub fn config_not_found_help() -> String {
        let mut help = String::from("No configuration file found. Searched:\n");
        for path in Self::config_file_paths() {
            help.push_str(&format!("  {}\n", path.display()));
        }
        help.push_str("Run `scanner config example > scanner.toml` to create one.");
        help
    }

    /// Apply environment variable overrides, reading variables through `var`
    fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // RPC
        if let Some(url) = var("SCANNER_RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(url) = var("SCANNER_DECODER_URL") {
            self.rpc.decoder_url = Some(url);
        }

        // Database
        if let Some(db_path) = var("SCANNER_DB_PATH") {
            self.database.path = db_path;
        }

        // Sync
        if let Some(concurrency) = var("SCANNER_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.sync.concurrency = concurrency;
        }
        if let Some(batch_size) = var("SCANNER_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.sync.batch_size = batch_size;
        }
        if let Some(size) = var("SCANNER_MIN_BLOB_SIZE").and_then(|v| v.parse().ok()) {
            self.sync.min_blob_size = size;
        }
        if let Some(start) = var("SCANNER_START_BLOCK").and_then(|v| v.parse().ok()) {
            self.sync.start_block = start;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for url in [self.rpc.url.as_str(), self.rpc.decoder_url()] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("Invalid RPC URL: {}", url);
            }
        }

        if self.sync.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }
        if self.sync.concurrency == 0 {
            anyhow::bail!("Concurrency must be greater than 0");
        }
        if self.sync.min_blob_size == 0 {
            anyhow::bail!("Minimum blob size must be greater than 0");
        }
        if self.sync.block_timeout_secs == 0 {
            anyhow::bail!("Block timeout must be greater than 0");
        }

        Ok(())
    }
}
