//! Configuration for the crank program

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::sync::SyncPolicy;
use crate::types::AccountAddress;

/// Adshares incoming transaction crank
#[derive(Parser, Debug, Clone)]
#[command(name = "adpay-crank")]
#[command(about = "Processes incoming ADS transactions", long_about = None)]
pub struct Config {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Command>,

    /// ADS node JSON-RPC URL
    #[arg(long, env = "ADS_RPC_URL", default_value = "http://127.0.0.1:5000")]
    pub rpc_url: String,

    /// Our own account address; payments must target it. Only needed to process
    #[arg(long, env = "ADSHARES_ADDRESS")]
    pub adshares_address: Option<AccountAddress>,

    /// Database path
    #[arg(long, env = "DATABASE_PATH", default_value = "adpay.db")]
    pub db_path: PathBuf,

    /// Total block sync attempts while signatures are unavailable
    #[arg(long, env = "SYNC_MAX_ATTEMPTS", default_value = "5")]
    pub sync_max_attempts: u32,

    /// Delay between block sync attempts in seconds
    #[arg(long, env = "SYNC_RETRY_DELAY_SECS", default_value = "3")]
    pub sync_retry_delay_secs: u64,

    /// Timeout for node and peer host requests in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "30")]
    pub http_timeout_secs: u64,

    /// Interval between runs in watch mode, in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sync blocks and process incoming transactions once
    ProcessTx,
    /// Process incoming transactions repeatedly
    Watch,
    /// Show payment counts per status
    Stats,
    /// List payments still waiting to be processed
    Pending,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ADSHARES_ADDRESS is required to process transactions")]
    MissingAdsharesAddress,
}

impl Config {
    pub fn platform_address(&self) -> Result<AccountAddress, ConfigError> {
        self.adshares_address.clone().ok_or(ConfigError::MissingAdsharesAddress)
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_attempts: self.sync_max_attempts.max(1),
            retry_delay: Duration::from_secs(self.sync_retry_delay_secs),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
