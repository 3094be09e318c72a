//! Scan Configuration
//!
//! JSON configuration file consumed at startup: the RPC endpoint, the
//! traversal cutoff, the address lists the filter chain is assembled
//! from, and the optional Redis and metrics wiring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::chain::{ChainMode, FilterChain};
use crate::client::{SenderResolver, DEFAULT_RPC_URL};
use crate::filter::{DateFilter, DestinationFilter, FilterConfigError, SourceFilter};
use crate::lot::LotPolicy;
use crate::publisher::DEFAULT_CHANNEL;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "~/.lotscope/config.json";

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// An inclusive date window for the optional date filter
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Everything a scan run needs to know
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// JSON-RPC endpoint to fetch blocks from
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Oldest block timestamp (inclusive) the traversal still processes
    pub cutoff: DateTime<Utc>,
    /// Addresses whose outgoing transactions qualify
    #[serde(default)]
    pub from_accounts: Vec<String>,
    /// Addresses whose incoming transactions qualify
    #[serde(default)]
    pub to_accounts: Vec<String>,
    /// Chain identifier the filters are configured for
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Chain version the filters are configured for
    #[serde(default = "default_chain_version")]
    pub chain_version: u64,
    /// How the assembled filters combine
    #[serde(default)]
    pub mode: ChainMode,
    /// When a qualifying transaction opens a new lot
    #[serde(default)]
    pub lot_policy: LotPolicy,
    /// Optional additional date filter appended to the chain
    #[serde(default)]
    pub date_window: Option<DateWindow>,
    /// Redis endpoint to publish lot records to, if any
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Pub/sub channel for lot records
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Address to serve Prometheus metrics on, if any
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.to_string()
}

fn default_chain_id() -> u64 {
    1
}

fn default_chain_version() -> u64 {
    1
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

impl ScanConfig {
    /// Load configuration from a JSON file, expanding a leading `~`
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let expanded = expand_path(path);
        let raw = fs::read_to_string(&expanded).map_err(|source| ConfigError::Read {
            path: expanded.clone(),
            source,
        })?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Assemble the filter chain: source filters, then destination
    /// filters, then the optional date filter, in configuration order.
    pub fn build_filter_chain(
        &self,
        resolver: Arc<dyn SenderResolver>,
    ) -> Result<FilterChain, FilterConfigError> {
        let mut chain = FilterChain::new(self.mode);

        for account in &self.from_accounts {
            info!(address = %account, "adding filter for transactions from account");
            chain.push(Box::new(SourceFilter::new(
                self.chain_version,
                self.chain_id,
                account,
                resolver.clone(),
            )?));
        }

        for account in &self.to_accounts {
            info!(address = %account, "adding filter for transactions to account");
            chain.push(Box::new(DestinationFilter::new(
                self.chain_version,
                self.chain_id,
                account,
            )?));
        }

        if let Some(window) = &self.date_window {
            info!(start = %window.start, end = %window.end, "adding date filter");
            chain.push(Box::new(DateFilter::new(window.start, window.end)?));
        }

        Ok(chain)
    }
}

/// Expand ~ to the home directory in a path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
