//! Block Scanner
//!
//! Walks blocks backward from the chain head until a block's timestamp
//! falls before the configured cutoff, evaluating every transaction
//! against the filter chain and forwarding qualifying ones to the lot
//! book. A block whose timestamp equals the cutoff is still processed.
//!
//! The walk is sequential: a block's transactions are fully filtered,
//! aggregated and reported before the parent block is fetched. One
//! transaction's filter failure never aborts its block; a block fetch
//! failure aborts the run.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::FilterChain;
use crate::client::{ChainClient, ClientError, FetchedBlock};
use crate::decoder::{ScanBlock, ScanTransaction};
use crate::filter::TransactionFilter;
use crate::lot::{wei_to_eth, LotBook};
use crate::metrics::{ScanMetrics, BLOCKS_PROCESSED, LAST_BLOCK_COMPLETED, TXNS_PROCESSED};

/// Errors fatal to a traversal run
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to fetch head block: {source}")]
    HeadFetch {
        #[source]
        source: ClientError,
    },

    #[error("Failed to fetch block {number}, last fully completed block was {last_completed}: {source}")]
    ParentFetch {
        number: u64,
        last_completed: u64,
        #[source]
        source: ClientError,
    },
}

/// Totals for one traversal run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Blocks fully processed
    pub blocks_processed: u64,
    /// Transactions checked against the filter chain
    pub txns_processed: u64,
    /// Transactions that qualified
    pub txns_qualified: u64,
    /// Number of the oldest fully processed block
    pub last_block: Option<u64>,
}

/// Drives the backward walk over blocks
pub struct Scanner {
    client: Arc<dyn ChainClient>,
    chain: FilterChain,
    metrics: Arc<dyn ScanMetrics>,
}

impl Scanner {
    pub fn new(
        client: Arc<dyn ChainClient>,
        chain: FilterChain,
        metrics: Arc<dyn ScanMetrics>,
    ) -> Self {
        Self {
            client,
            chain,
            metrics,
        }
    }

    /// Run the traversal, accumulating qualifying transactions into `book`
    pub async fn run(
        &self,
        cutoff: DateTime<Utc>,
        book: &mut LotBook,
    ) -> Result<ScanReport, ScanError> {
        let mut report = ScanReport::default();

        let mut fetched = self
            .client
            .head_block()
            .await
            .map_err(|source| ScanError::HeadFetch { source })?;

        info!(head = fetched.block.number, %cutoff, "starting backward scan");

        loop {
            if fetched.block.block_time() < cutoff {
                break;
            }

            self.process_block(&fetched, book, &mut report);

            let completed = fetched.block.number;
            if completed == 0 {
                debug!("reached genesis before cutoff");
                break;
            }

            let parent = completed - 1;
            fetched = self
                .client
                .block_by_number(parent)
                .await
                .map_err(|source| ScanError::ParentFetch {
                    number: parent,
                    last_completed: completed,
                    source,
                })?;
        }

        info!(
            blocks = report.blocks_processed,
            txns = report.txns_processed,
            qualified = report.txns_qualified,
            "scan finished"
        );
        Ok(report)
    }

    fn process_block(&self, fetched: &FetchedBlock, book: &mut LotBook, report: &mut ScanReport) {
        let block = &fetched.block;
        debug!(
            number = block.number,
            txns = fetched.txns.len(),
            "qualifying block"
        );

        for txn in &fetched.txns {
            report.txns_processed += 1;
            self.metrics.increment_counter(TXNS_PROCESSED);

            match self.chain.qualify(block, txn) {
                Ok(true) => {
                    report.txns_qualified += 1;
                    self.forward(block, txn, book);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(hash = %txn.hash, error = %e, "failed to qualify transaction");
                }
            }
        }

        self.metrics.increment_counter(BLOCKS_PROCESSED);
        self.metrics.set_gauge(LAST_BLOCK_COMPLETED, block.number as i64);
        report.blocks_processed += 1;
        report.last_block = Some(block.number);
    }

    /// Hand a qualifying transaction to the lot book. A transaction whose
    /// sender or amount cannot be resolved is excluded, not guessed at.
    fn forward(&self, block: &ScanBlock, txn: &ScanTransaction, book: &mut LotBook) {
        let sender = match self.client.resolve_sender(txn) {
            Ok(sender) => sender,
            Err(e) => {
                warn!(
                    hash = %txn.hash,
                    error = %e,
                    "dropping qualifying transaction, sender resolution failed"
                );
                return;
            }
        };
        let amount = match wei_to_eth(txn.value) {
            Ok(amount) => amount,
            Err(e) => {
                warn!(
                    hash = %txn.hash,
                    error = %e,
                    "dropping qualifying transaction, value not representable"
                );
                return;
            }
        };
        let lot_id = book.add_transaction(block, sender, txn.nonce, amount);
        info!(hash = %txn.hash, lot = %lot_id, "transaction qualifies for lot");
    }
}
