//! Filter Chain
//!
//! Combines an ordered sequence of filters under AND or OR semantics.
//!
//! Evaluation policy:
//! - AND mode: a filter error aborts the chain and surfaces as the chain's
//!   error; a false result short-circuits to false.
//! - OR mode: a filter error is logged and that filter counts as
//!   non-qualifying; a true result short-circuits to true.
//! - Empty chain: AND qualifies (vacuous truth), OR disqualifies (vacuous
//!   falsity).
//!
//! Filter order only affects which error surfaces first in AND mode and
//! how much work short-circuiting saves.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decoder::{ScanBlock, ScanTransaction};
use crate::filter::{FilterError, TransactionFilter};

/// How the chain combines its filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// Every filter must qualify
    #[default]
    And,
    /// Any filter qualifying is enough
    Or,
}

/// An ordered sequence of filters evaluated under one [`ChainMode`]
pub struct FilterChain {
    mode: ChainMode,
    filters: Vec<Box<dyn TransactionFilter>>,
}

impl FilterChain {
    /// Create an empty chain with the given mode
    pub fn new(mode: ChainMode) -> Self {
        Self {
            mode,
            filters: Vec::new(),
        }
    }

    /// Create a chain from an existing filter sequence
    pub fn with_filters(mode: ChainMode, filters: Vec<Box<dyn TransactionFilter>>) -> Self {
        Self { mode, filters }
    }

    /// Append a filter; evaluation order is insertion order
    pub fn push(&mut self, filter: Box<dyn TransactionFilter>) {
        self.filters.push(filter);
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl TransactionFilter for FilterChain {
    fn qualify(&self, block: &ScanBlock, txn: &ScanTransaction) -> Result<bool, FilterError> {
        let result = match self.mode {
            ChainMode::And => {
                for filter in &self.filters {
                    if !filter.qualify(block, txn)? {
                        return Ok(false);
                    }
                }
                true
            }
            ChainMode::Or => {
                let mut qualified = false;
                for filter in &self.filters {
                    match filter.qualify(block, txn) {
                        Ok(true) => {
                            qualified = true;
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                hash = %txn.hash,
                                error = %e,
                                "filter failed, treated as non-qualifying"
                            );
                        }
                    }
                }
                qualified
            }
        };
        if result {
            debug!(hash = %txn.hash, "transaction qualifies for filter chain");
        }
        Ok(result)
    }
}
