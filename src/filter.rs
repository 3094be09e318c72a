//! Transaction Filters
//!
//! Predicates over (block, transaction) pairs that decide whether a
//! transaction is relevant to lot accounting. Three variants exist: by
//! sender, by recipient, and by block date. Filters are built once from
//! configuration before scanning begins and are immutable afterwards.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use crate::client::SenderResolver;
use crate::decoder::{ResolveError, ScanBlock, ScanTransaction};

/// Chain versions the address filters know how to handle
pub const SUPPORTED_CHAIN_VERSIONS: &[u64] = &[1];

/// Errors raised while building a filter. These are fatal to setup and
/// never occur mid-scan.
#[derive(Error, Debug)]
pub enum FilterConfigError {
    #[error("Chain version {0} is not supported")]
    UnsupportedChainVersion(u64),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Errors raised while evaluating a filter against one transaction
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Sender resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

/// A predicate deciding whether a transaction qualifies for lot accounting
pub trait TransactionFilter: Send + Sync {
    fn qualify(&self, block: &ScanBlock, txn: &ScanTransaction) -> Result<bool, FilterError>;
}

fn parse_address(address: &str) -> Result<Address, FilterConfigError> {
    Address::from_str(address).map_err(|e| FilterConfigError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn check_chain_version(version: u64) -> Result<(), FilterConfigError> {
    if SUPPORTED_CHAIN_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(FilterConfigError::UnsupportedChainVersion(version))
    }
}

/// Qualifies transactions sent from a configured address
pub struct SourceFilter {
    chain_version: u64,
    chain_id: u64,
    address: Address,
    resolver: Arc<dyn SenderResolver>,
}

impl SourceFilter {
    pub fn new(
        chain_version: u64,
        chain_id: u64,
        address: &str,
        resolver: Arc<dyn SenderResolver>,
    ) -> Result<Self, FilterConfigError> {
        check_chain_version(chain_version)?;
        let address = parse_address(address)?;
        Ok(Self {
            chain_version,
            chain_id,
            address,
            resolver,
        })
    }

    /// The address this filter matches senders against
    pub fn address(&self) -> Address {
        self.address
    }
}

impl TransactionFilter for SourceFilter {
    fn qualify(&self, _block: &ScanBlock, txn: &ScanTransaction) -> Result<bool, FilterError> {
        let sender = self.resolver.resolve_sender(txn)?;
        trace!(
            hash = %txn.hash,
            %sender,
            wanted = %self.address,
            chain_id = self.chain_id,
            chain_version = self.chain_version,
            "checking transaction sender"
        );
        Ok(sender == self.address)
    }
}

/// Qualifies transactions sent to a configured address.
///
/// Contract-creation transactions have no recipient and never qualify.
pub struct DestinationFilter {
    chain_version: u64,
    chain_id: u64,
    address: Address,
}

impl DestinationFilter {
    pub fn new(
        chain_version: u64,
        chain_id: u64,
        address: &str,
    ) -> Result<Self, FilterConfigError> {
        check_chain_version(chain_version)?;
        let address = parse_address(address)?;
        Ok(Self {
            chain_version,
            chain_id,
            address,
        })
    }

    /// The address this filter matches recipients against
    pub fn address(&self) -> Address {
        self.address
    }
}

impl TransactionFilter for DestinationFilter {
    fn qualify(&self, _block: &ScanBlock, txn: &ScanTransaction) -> Result<bool, FilterError> {
        trace!(
            hash = %txn.hash,
            recipient = ?txn.recipient,
            wanted = %self.address,
            chain_id = self.chain_id,
            chain_version = self.chain_version,
            "checking transaction recipient"
        );
        Ok(txn.recipient == Some(self.address))
    }
}

/// Qualifies transactions in blocks whose timestamp lies in [start, end],
/// both bounds inclusive
pub struct DateFilter {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateFilter {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, FilterConfigError> {
        if start > end {
            return Err(FilterConfigError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }
}

impl TransactionFilter for DateFilter {
    fn qualify(&self, block: &ScanBlock, _txn: &ScanTransaction) -> Result<bool, FilterError> {
        let t = block.block_time();
        Ok(t >= self.start && t <= self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockSenderResolver;
    use alloy::primitives::{address, B256, TxHash, U256};
    use chrono::TimeZone;

    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

    fn block_at(timestamp: u64) -> ScanBlock {
        ScanBlock {
            number: 100,
            timestamp,
            hash: B256::ZERO,
        }
    }

    fn txn_to(recipient: Option<Address>) -> ScanTransaction {
        ScanTransaction {
            hash: TxHash::repeat_byte(0xde),
            chain_id: Some(1),
            recipient,
            value: U256::from(1u64),
            nonce: 0,
            envelope: None,
        }
    }

    fn resolver_returning(sender: Address) -> Arc<MockSenderResolver> {
        let mut resolver = MockSenderResolver::new();
        resolver.expect_resolve_sender().returning(move |_| Ok(sender));
        Arc::new(resolver)
    }

    // ==================== SourceFilter tests ====================

    #[test]
    fn test_source_filter_rejects_unsupported_chain_version() {
        let result = SourceFilter::new(2, 1, WETH, resolver_returning(Address::ZERO));
        assert!(matches!(
            result,
            Err(FilterConfigError::UnsupportedChainVersion(2))
        ));
    }

    #[test]
    fn test_source_filter_rejects_bad_address() {
        let result = SourceFilter::new(1, 1, "0xnothex", resolver_returning(Address::ZERO));
        assert!(matches!(result, Err(FilterConfigError::InvalidAddress { .. })));
    }

    #[test]
    fn test_source_filter_parses_address_canonically() {
        let filter =
            SourceFilter::new(1, 1, WETH, resolver_returning(Address::ZERO)).unwrap();
        assert_eq!(
            filter.address(),
            address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")
        );
    }

    #[test]
    fn test_source_filter_qualifies_matching_sender() {
        let sender = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let filter = SourceFilter::new(1, 1, WETH, resolver_returning(sender)).unwrap();

        let qual = filter.qualify(&block_at(1000), &txn_to(None)).unwrap();
        assert!(qual);
    }

    #[test]
    fn test_source_filter_qualifies_lowercase_configured_address() {
        // Same address, different input casing
        let sender = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let filter = SourceFilter::new(
            1,
            1,
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
            resolver_returning(sender),
        )
        .unwrap();

        assert!(filter.qualify(&block_at(1000), &txn_to(None)).unwrap());
    }

    #[test]
    fn test_source_filter_disqualifies_differing_sender() {
        // One character off
        let sender = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc3");
        let filter = SourceFilter::new(1, 1, WETH, resolver_returning(sender)).unwrap();

        assert!(!filter.qualify(&block_at(1000), &txn_to(None)).unwrap());
    }

    #[test]
    fn test_source_filter_propagates_resolution_failure() {
        let mut resolver = MockSenderResolver::new();
        resolver
            .expect_resolve_sender()
            .returning(|_| Err(ResolveError::SignatureRecovery("bad signature".to_string())));
        let filter = SourceFilter::new(1, 1, WETH, Arc::new(resolver)).unwrap();

        let result = filter.qualify(&block_at(1000), &txn_to(None));
        assert!(matches!(result, Err(FilterError::Resolve(_))));
    }

    // ==================== DestinationFilter tests ====================

    #[test]
    fn test_destination_filter_rejects_unsupported_chain_version() {
        let result = DestinationFilter::new(0, 1, WETH);
        assert!(matches!(
            result,
            Err(FilterConfigError::UnsupportedChainVersion(0))
        ));
    }

    #[test]
    fn test_destination_filter_qualifies_matching_recipient() {
        let filter = DestinationFilter::new(1, 1, WETH).unwrap();
        let to = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

        assert!(filter.qualify(&block_at(1000), &txn_to(Some(to))).unwrap());
    }

    #[test]
    fn test_destination_filter_disqualifies_other_recipient() {
        let filter = DestinationFilter::new(1, 1, WETH).unwrap();
        let to = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");

        assert!(!filter.qualify(&block_at(1000), &txn_to(Some(to))).unwrap());
    }

    #[test]
    fn test_destination_filter_never_qualifies_contract_creation() {
        let filter = DestinationFilter::new(1, 1, WETH).unwrap();

        assert!(!filter.qualify(&block_at(1000), &txn_to(None)).unwrap());
    }

    // ==================== DateFilter tests ====================

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_date_filter_rejects_inverted_range() {
        let result = DateFilter::new(utc(2021, 1, 2), utc(2021, 1, 1));
        assert!(matches!(result, Err(FilterConfigError::InvalidDateRange { .. })));
    }

    #[test]
    fn test_date_filter_accepts_equal_bounds() {
        assert!(DateFilter::new(utc(2021, 1, 1), utc(2021, 1, 1)).is_ok());
    }

    #[test]
    fn test_date_filter_bounds_are_inclusive() {
        let start = utc(2021, 1, 1);
        let end = utc(2021, 12, 31);
        let filter = DateFilter::new(start, end).unwrap();
        let txn = txn_to(None);

        assert!(filter
            .qualify(&block_at(start.timestamp() as u64), &txn)
            .unwrap());
        assert!(filter
            .qualify(&block_at(end.timestamp() as u64), &txn)
            .unwrap());
        assert!(filter
            .qualify(&block_at(utc(2021, 6, 15).timestamp() as u64), &txn)
            .unwrap());
    }

    #[test]
    fn test_date_filter_disqualifies_outside_range() {
        let start = utc(2021, 1, 1);
        let end = utc(2021, 12, 31);
        let filter = DateFilter::new(start, end).unwrap();
        let txn = txn_to(None);

        assert!(!filter
            .qualify(&block_at(start.timestamp() as u64 - 1), &txn)
            .unwrap());
        assert!(!filter
            .qualify(&block_at(end.timestamp() as u64 + 1), &txn)
            .unwrap());
    }
}
