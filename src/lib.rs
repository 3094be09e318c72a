//! Lotscope Library
//!
//! This crate walks Ethereum blocks backward from the chain head to a
//! configured cutoff, evaluates every transaction against a composable
//! filter chain, and groups qualifying transactions into portfolio
//! acquisition lots. Completed lots can be published to Redis and scan
//! progress is exposed as Prometheus metrics.

pub mod chain;
pub mod client;
pub mod config;
pub mod decoder;
pub mod filter;
pub mod lot;
pub mod metrics;
pub mod publisher;
pub mod scanner;

// Re-export commonly used types
pub use chain::{ChainMode, FilterChain};
pub use client::{ChainClient, ClientError, FetchedBlock, RpcClient, RpcConfig, SenderResolver};
pub use config::ScanConfig;
pub use decoder::{decode_transaction, ScanBlock, ScanTransaction};
pub use filter::{DateFilter, DestinationFilter, SourceFilter, TransactionFilter};
pub use lot::{Lot, LotBook, LotPolicy, LotTxn};
pub use metrics::{NoopMetrics, PrometheusScanMetrics, ScanMetrics};
pub use publisher::{LotMessage, Publisher};
pub use scanner::{ScanError, ScanReport, Scanner};
