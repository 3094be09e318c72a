//! Chain Client
//!
//! Connects to an Ethereum JSON-RPC endpoint and exposes the two narrow
//! capabilities the scan needs: block fetching and sender resolution.
//! Block fetches are wrapped in bounded retry with exponential backoff
//! before the final fatal error.

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Block, BlockNumberOrTag, BlockTransactions};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::decoder::{self, ResolveError, ScanBlock, ScanTransaction};

/// Default JSON-RPC endpoint
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Maximum number of retries for a single block fetch
pub const MAX_FETCH_RETRIES: u32 = 3;

/// Initial backoff delay for fetch retries
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for fetch retries
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Errors that can occur while talking to the chain
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid RPC url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("Block {0} not found")]
    BlockNotFound(BlockNumberOrTag),
}

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// JSON-RPC endpoint url
    pub url: String,
    /// Maximum retries per block fetch
    pub max_fetch_retries: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            max_fetch_retries: MAX_FETCH_RETRIES,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl RpcConfig {
    /// Create a new config with the specified endpoint url
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// A fetched block together with its decoded transactions
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub block: ScanBlock,
    pub txns: Vec<ScanTransaction>,
}

impl FetchedBlock {
    fn from_rpc(block: Block) -> Self {
        let header = ScanBlock {
            number: block.header.number,
            timestamp: block.header.timestamp,
            hash: block.header.hash,
        };
        let txns = match block.transactions {
            BlockTransactions::Full(txs) => {
                txs.into_iter().map(ScanTransaction::from_rpc).collect()
            }
            _ => {
                warn!(number = header.number, "block carried no full transactions");
                Vec::new()
            }
        };
        Self {
            block: header,
            txns,
        }
    }
}

/// Resolves a transaction's sender address.
///
/// Recovery is chain-specific signature work, so filters depend on this
/// capability instead of doing it themselves.
#[cfg_attr(test, mockall::automock)]
pub trait SenderResolver: Send + Sync {
    fn resolve_sender(&self, txn: &ScanTransaction) -> Result<Address, ResolveError>;
}

/// Block-fetch capabilities of the chain client
#[async_trait]
pub trait ChainClient: SenderResolver {
    /// Fetch the most recent block
    async fn head_block(&self) -> Result<FetchedBlock, ClientError>;

    /// Fetch a block by number
    async fn block_by_number(&self, number: u64) -> Result<FetchedBlock, ClientError>;
}

/// JSON-RPC chain client over HTTP
pub struct RpcClient {
    provider: RootProvider<Http<Client>>,
    config: RpcConfig,
    chain_id: u64,
}

impl RpcClient {
    /// Connect to the configured endpoint and verify it responds
    pub async fn connect(config: RpcConfig) -> Result<Self, ClientError> {
        let url = config.url.parse().map_err(|e: url::ParseError| ClientError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        let provider = ProviderBuilder::new().on_http(url);

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        info!(url = %config.url, chain_id, "connected to RPC endpoint");

        Ok(Self {
            provider,
            config,
            chain_id,
        })
    }

    /// Chain id reported by the endpoint at connect time
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn fetch_once(&self, tag: BlockNumberOrTag) -> Result<FetchedBlock, ClientError> {
        let block = self
            .provider
            .get_block_by_number(tag, true.into())
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?
            .ok_or(ClientError::BlockNotFound(tag))?;
        Ok(FetchedBlock::from_rpc(block))
    }

    /// Fetch a block, retrying transient RPC failures with backoff.
    /// A missing block is not retried; a lagging or pruned node will not
    /// produce it on the next attempt either.
    async fn fetch_block(&self, tag: BlockNumberOrTag) -> Result<FetchedBlock, ClientError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(tag).await {
                Ok(fetched) => {
                    debug!(%tag, number = fetched.block.number, txns = fetched.txns.len(), "fetched block");
                    return Ok(fetched);
                }
                Err(e @ ClientError::Rpc(_)) if attempt < self.config.max_fetch_retries => {
                    let delay = self.config.backoff_delay(attempt);
                    attempt += 1;
                    warn!(
                        %tag,
                        attempt,
                        max = self.config.max_fetch_retries,
                        ?delay,
                        error = %e,
                        "block fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl SenderResolver for RpcClient {
    fn resolve_sender(&self, txn: &ScanTransaction) -> Result<Address, ResolveError> {
        let envelope = txn.envelope.as_ref().ok_or(ResolveError::MissingEnvelope)?;
        decoder::recover_sender(envelope)
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn head_block(&self) -> Result<FetchedBlock, ClientError> {
        self.fetch_block(BlockNumberOrTag::Latest).await
    }

    async fn block_by_number(&self, number: u64) -> Result<FetchedBlock, ClientError> {
        self.fetch_block(BlockNumberOrTag::Number(number)).await
    }
}
