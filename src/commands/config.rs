//! `config` subcommand: inspect the resolved scanner configuration

use crate::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the configuration the scanner would run with, as TOML
    Show,

    /// Load and validate the configuration, including environment overrides
    Validate,

    /// Print a commented configuration file with every default
    Example,

    /// List the files searched for configuration, in order
    Paths,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show(),
        ConfigCommands::Validate => validate(),
        ConfigCommands::Example => {
            print!("{}", EXAMPLE);
            Ok(())
        }
        ConfigCommands::Paths => {
            for (i, path) in Config::config_file_paths().iter().enumerate() {
                let marker = if path.exists() { " (found)" } else { "" };
                println!("{}. {}{}", i + 1, path.display(), marker);
            }
            Ok(())
        }
    }
}

/// First config file on the search path that exists
fn source_file() -> Option<PathBuf> {
    Config::config_file_paths().into_iter().find(|p| p.exists())
}

fn show() -> Result<()> {
    let config = Config::load()?;
    match source_file() {
        Some(path) => println!("# from {}", path.display()),
        None => println!("# built-in defaults"),
    }
    print!("{}", toml::to_string_pretty(&config)?);
    if config.rpc.decoder_url.is_none() {
        println!("# decoder calls go to {}", config.rpc.decoder_url());
    }
    Ok(())
}

fn validate() -> Result<()> {
    if source_file().is_none() {
        println!("{}", Config::config_not_found_help());
    }
    let config = Config::load()?;
    config.validate()?;
    println!(
        "Configuration is valid: node {}, database {}",
        config.rpc.url, config.database.path
    );
    Ok(())
}

const EXAMPLE: &str = r#"# Chain Scanner Configuration File
#
# Location priority (first found is used):
#   1. ./scanner.toml (current directory)
#   2. ~/.config/chain-scanner/config.toml (user config)
#   3. /etc/chain-scanner/config.toml (system-wide)
#
# Override priority: CLI flags > Environment variables > Config file > Defaults
#
# Environment variables: SCANNER_RPC_URL, SCANNER_DECODER_URL, SCANNER_DB_PATH,
#   SCANNER_CONCURRENCY, SCANNER_BATCH_SIZE, SCANNER_MIN_BLOB_SIZE, SCANNER_START_BLOCK

[rpc]
# Node JSON-RPC endpoint
url = "http://localhost:9944"
# Decoding gateway serving decoder_* methods (defaults to url)
# decoder_url = "http://localhost:9955"
# Request timeout in milliseconds
timeout_ms = 30000
# Retry settings for transient failures
max_retries = 3
retry_initial_delay_ms = 1000
retry_max_delay_ms = 30000

[database]
# SQLite database path
path = "./scanner.db"

[sync]
# Blocks decoded in parallel during backfill
concurrency = 10
# Blocks per backfill and gap repair window
batch_size = 5000
# Byte arguments longer than this many bytes are stored as blobs
min_blob_size = 65536
# Block number the initial scan starts from
start_block = 0
# Head polling interval and idle queue backoff in milliseconds
poll_interval_ms = 1000
queue_backoff_ms = 1000
# Give up on a single backfill block after this many seconds
block_timeout_secs = 90
# Wait for another task's metadata load before taking over
metadata_wait_secs = 30
# Sessions of validator sets kept in memory
session_cache_depth = 3
"#;
