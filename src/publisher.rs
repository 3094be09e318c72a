//! Lot Publisher
//!
//! Publishes completed lot records to a Redis pub/sub channel as JSON for
//! downstream accounting consumers.

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lot::{Lot, LotTxn};

/// Default Redis channel for lot records
pub const DEFAULT_CHANNEL: &str = "lot_records";

/// Errors that can occur during publishing
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One transaction inside a published lot record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotTxnMessage {
    /// Sender address with 0x prefix
    pub from: String,
    /// Transaction nonce
    pub nonce: u64,
    /// Ether amount as a decimal string
    pub amount: String,
}

/// Lot record format for Redis publication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotMessage {
    /// Lot identifier
    pub id: String,
    /// Acquisition date, RFC 3339
    pub acquisition_date: String,
    /// Acquisition exchange rate as a decimal string
    pub rate: String,
    /// The lot's transactions in arrival order
    pub txns: Vec<LotTxnMessage>,
}

impl LotMessage {
    /// Build a message from a lot record
    pub fn from_lot(lot: &Lot) -> Self {
        Self {
            id: lot.id().to_string(),
            acquisition_date: lot.acquisition_date().to_rfc3339(),
            rate: lot.rate().to_string(),
            txns: lot.txns().iter().map(LotTxnMessage::from_txn).collect(),
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl LotTxnMessage {
    fn from_txn(txn: &LotTxn) -> Self {
        Self {
            from: format!("{:#x}", txn.sender),
            nonce: txn.nonce,
            amount: txn.amount.to_string(),
        }
    }
}

/// Redis publisher for lot records
pub struct Publisher {
    connection: MultiplexedConnection,
    channel: String,
}

impl Publisher {
    /// Create a new publisher over an established Redis connection
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Create a new publisher with the default channel
    pub fn with_default_channel(connection: MultiplexedConnection) -> Self {
        Self::new(connection, DEFAULT_CHANNEL)
    }

    /// Publish a lot record. Returns the number of subscribers that
    /// received the message.
    pub async fn publish_lot(&mut self, lot: &Lot) -> Result<i64, PublishError> {
        let message = LotMessage::from_lot(lot);
        self.publish_message(&message).await
    }

    /// Publish a pre-formatted lot message
    pub async fn publish_message(&mut self, message: &LotMessage) -> Result<i64, PublishError> {
        let json = message.to_json()?;
        let subscribers: i64 = self.connection.publish(&self.channel, &json).await?;
        Ok(subscribers)
    }

    /// The channel this publisher writes to
    pub fn channel(&self) -> &str {
        &self.channel
    }
}
