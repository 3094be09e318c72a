//! Lot Aggregation
//!
//! Groups qualifying transactions into ownership lots. A lot is one
//! accounting acquisition unit: an id assigned once at creation, the
//! acquisition date, an exchange rate for downstream valuation, and the
//! transactions that make it up in arrival order.
//!
//! Amounts are fixed-precision decimals. Wei values convert at scale 18
//! and never pass through binary floating point.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::{ContextV7, Timestamp, Uuid};

use crate::decoder::ScanBlock;

/// Decimal places of an ether amount expressed in wei
const WEI_SCALE: u32 = 18;

/// Errors that can occur during lot aggregation
#[derive(Error, Debug)]
pub enum LotError {
    #[error("Transaction value {0} wei exceeds the representable lot amount")]
    AmountOverflow(U256),
}

/// Convert a wei value to an ether amount at fixed precision
pub fn wei_to_eth(wei: U256) -> Result<Decimal, LotError> {
    let wei_u128: u128 = wei.try_into().map_err(|_| LotError::AmountOverflow(wei))?;
    let wei_i128 = i128::try_from(wei_u128).map_err(|_| LotError::AmountOverflow(wei))?;
    Decimal::try_from_i128_with_scale(wei_i128, WEI_SCALE).map_err(|_| LotError::AmountOverflow(wei))
}

/// One transaction inside a lot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotTxn {
    pub sender: Address,
    pub nonce: u64,
    pub amount: Decimal,
}

/// One accounting acquisition unit
#[derive(Debug, Clone, Serialize)]
pub struct Lot {
    id: Uuid,
    acquisition_date: DateTime<Utc>,
    rate: Decimal,
    txns: Vec<LotTxn>,
}

impl Lot {
    /// Create an empty lot. The id is assigned here, once, and never
    /// changes afterwards.
    pub fn new(id: Uuid, acquisition_date: DateTime<Utc>) -> Self {
        Self {
            id,
            acquisition_date,
            rate: Decimal::ZERO,
            txns: Vec::new(),
        }
    }

    /// Set the acquisition exchange rate
    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate = rate;
        self
    }

    /// Append a transaction; per-lot order is arrival order
    pub fn add_txn(&mut self, sender: Address, nonce: u64, amount: Decimal) {
        self.txns.push(LotTxn {
            sender,
            nonce,
            amount,
        });
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn acquisition_date(&self) -> DateTime<Utc> {
        self.acquisition_date
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn txns(&self) -> &[LotTxn] {
        &self.txns
    }

    /// Total amount across the lot's transactions
    pub fn total_amount(&self) -> Decimal {
        self.txns.iter().map(|t| t.amount).sum()
    }
}

/// When a qualifying transaction starts a new lot versus extending an
/// existing one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LotPolicy {
    /// Every qualifying transaction opens its own lot
    PerTransaction,
    /// One lot per UTC calendar day of the block timestamp
    #[default]
    PerDay,
    /// One lot per sending counterparty
    PerSender,
}

/// Accumulates qualifying transactions into lots under a [`LotPolicy`].
///
/// Lot ids come from a v7 UUID source seeded by wall-clock time; ids
/// created later in the run never sort below earlier ones.
pub struct LotBook {
    policy: LotPolicy,
    lots: Vec<Lot>,
    by_sender: HashMap<Address, usize>,
    ids: ContextV7,
}

impl LotBook {
    pub fn new(policy: LotPolicy) -> Self {
        Self {
            policy,
            lots: Vec::new(),
            by_sender: HashMap::new(),
            ids: ContextV7::new(),
        }
    }

    pub fn policy(&self) -> LotPolicy {
        self.policy
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn len(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    /// Record a qualifying transaction, extending an existing lot or
    /// opening a new one per the configured policy. Returns the id of the
    /// lot the transaction landed in.
    pub fn add_transaction(
        &mut self,
        block: &ScanBlock,
        sender: Address,
        nonce: u64,
        amount: Decimal,
    ) -> Uuid {
        let acquired = block.block_time();
        let target = self.target_index(acquired, sender);
        let index = match target {
            Some(index) => index,
            None => self.open_lot(acquired, sender),
        };
        let lot = &mut self.lots[index];
        lot.add_txn(sender, nonce, amount);
        lot.id()
    }

    fn target_index(&self, acquired: DateTime<Utc>, sender: Address) -> Option<usize> {
        match self.policy {
            LotPolicy::PerTransaction => None,
            // The walk is monotonic in time, so only the most recent lot
            // can still be on the same calendar day.
            LotPolicy::PerDay => match self.lots.last() {
                Some(last) if last.acquisition_date().date_naive() == acquired.date_naive() => {
                    Some(self.lots.len() - 1)
                }
                _ => None,
            },
            LotPolicy::PerSender => self.by_sender.get(&sender).copied(),
        }
    }

    fn open_lot(&mut self, acquired: DateTime<Utc>, sender: Address) -> usize {
        let id = Uuid::new_v7(Timestamp::now(&self.ids));
        self.lots.push(Lot::new(id, acquired));
        let index = self.lots.len() - 1;
        if self.policy == LotPolicy::PerSender {
            self.by_sender.insert(sender, index);
        }
        index
    }
}
