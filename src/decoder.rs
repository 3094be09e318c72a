//! Transaction Decoder
//!
//! Decodes transactions from RLP-encoded bytes and extracts the fields the
//! filter chain and lot aggregation work on. Supports legacy (type 0),
//! EIP-2930 (type 1), EIP-1559 (type 2) and EIP-4844 (type 3) transactions.
//! Sender recovery lives here too, since it is the chain-specific part of
//! the chain-client capability.

use alloy::consensus::TxEnvelope;
use alloy::primitives::{Address, B256, TxHash, U256};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during transaction decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to decode RLP: {0}")]
    RlpDecode(String),

    #[error("Empty input data")]
    EmptyInput,

    #[error("Unsupported transaction type: {0}")]
    UnsupportedTxType(u8),
}

/// Errors that can occur while resolving a transaction's sender
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Signature recovery failed: {0}")]
    SignatureRecovery(String),

    #[error("Transaction carries no signed envelope to recover from")]
    MissingEnvelope,
}

/// Block header fields the scan works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBlock {
    /// Block number
    pub number: u64,
    /// Block timestamp (seconds since the Unix epoch)
    pub timestamp: u64,
    /// Block hash
    pub hash: B256,
}

impl ScanBlock {
    /// The block timestamp as a UTC datetime.
    ///
    /// Timestamps outside chrono's representable range clamp to the epoch,
    /// which sorts them before any meaningful cutoff.
    pub fn block_time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.timestamp as i64, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Decoded transaction with the fields relevant to lot qualification
#[derive(Debug, Clone)]
pub struct ScanTransaction {
    /// Transaction hash
    pub hash: TxHash,
    /// Chain id the transaction was signed for, when replay-protected
    pub chain_id: Option<u64>,
    /// Recipient address (None for contract creation)
    pub recipient: Option<Address>,
    /// Transaction value in wei
    pub value: U256,
    /// Transaction nonce
    pub nonce: u64,
    /// The signed envelope, kept so the sender can be recovered on demand.
    /// Transactions built by hand in tests may omit it.
    pub envelope: Option<TxEnvelope>,
}

impl ScanTransaction {
    /// Build a transaction record from a signed envelope
    pub fn from_envelope(envelope: TxEnvelope) -> Result<Self, DecodeError> {
        let (chain_id, recipient, value, nonce) = extract_tx_fields(&envelope)?;
        Ok(Self {
            hash: *envelope.tx_hash(),
            chain_id,
            recipient,
            value,
            nonce,
            envelope: Some(envelope),
        })
    }

    /// Build a transaction record from an RPC transaction.
    ///
    /// The envelope conversion can fail for malformed signatures; the record
    /// is still produced from the RPC fields, and sender resolution for it
    /// will fail with [`ResolveError::MissingEnvelope`] rather than silently
    /// qualifying or disqualifying.
    pub fn from_rpc(tx: alloy::rpc::types::Transaction) -> Self {
        use alloy::consensus::Transaction as _;
        let chain_id = tx.chain_id();
        let recipient = tx.to();
        let value = tx.value();
        let nonce = tx.nonce();
        let envelope = TxEnvelope::from(tx);
        let hash = *envelope.tx_hash();
        let envelope = Some(envelope);
        Self {
            hash,
            chain_id,
            recipient,
            value,
            nonce,
            envelope,
        }
    }
}

/// Extract (chain id, recipient, value, nonce) based on the envelope type
fn extract_tx_fields(
    envelope: &TxEnvelope,
) -> Result<(Option<u64>, Option<Address>, U256, u64), DecodeError> {
    match envelope {
        TxEnvelope::Legacy(signed) => {
            let tx = signed.tx();
            Ok((tx.chain_id, tx.to.to().copied(), tx.value, tx.nonce))
        }
        TxEnvelope::Eip2930(signed) => {
            let tx = signed.tx();
            Ok((Some(tx.chain_id), tx.to.to().copied(), tx.value, tx.nonce))
        }
        TxEnvelope::Eip1559(signed) => {
            let tx = signed.tx();
            Ok((Some(tx.chain_id), tx.to.to().copied(), tx.value, tx.nonce))
        }
        TxEnvelope::Eip4844(signed) => {
            let tx = signed.tx().tx();
            Ok((Some(tx.chain_id), Some(tx.to), tx.value, tx.nonce))
        }
        _ => Err(DecodeError::UnsupportedTxType(envelope.tx_type() as u8)),
    }
}

/// Decode a transaction from RLP-encoded bytes
pub fn decode_transaction(rlp_bytes: &[u8]) -> Result<ScanTransaction, DecodeError> {
    if rlp_bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let envelope: TxEnvelope = alloy::rlp::Decodable::decode(&mut &rlp_bytes[..])
        .map_err(|e| DecodeError::RlpDecode(e.to_string()))?;

    ScanTransaction::from_envelope(envelope)
}

/// Recover the sender address from a signed envelope
pub fn recover_sender(envelope: &TxEnvelope) -> Result<Address, ResolveError> {
    envelope
        .recover_signer()
        .map_err(|e| ResolveError::SignatureRecovery(e.to_string()))
}

/// Parse a raw transaction hex string (with or without 0x prefix)
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, DecodeError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| DecodeError::RlpDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::{SignableTransaction, TxLegacy};
    use alloy::network::TxSignerSync;
    use alloy::primitives::{address, TxKind};
    use alloy::rlp::Encodable;
    use alloy::signers::local::PrivateKeySigner;
    use chrono::TimeZone;

    fn signed_legacy_envelope(
        signer: &PrivateKeySigner,
        nonce: u64,
        to: Option<Address>,
        value: U256,
    ) -> TxEnvelope {
        let mut tx = TxLegacy {
            chain_id: Some(1),
            nonce,
            to: to.map(TxKind::Call).unwrap_or(TxKind::Create),
            value,
            ..Default::default()
        };
        let sig = signer.sign_transaction_sync(&mut tx).unwrap();
        TxEnvelope::Legacy(tx.into_signed(sig))
    }

    // ==================== ScanBlock tests ====================

    #[test]
    fn test_block_time_matches_timestamp() {
        let block = ScanBlock {
            number: 1,
            timestamp: 1_609_459_200, // 2021-01-01T00:00:00Z
            hash: B256::ZERO,
        };
        let expected = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(block.block_time(), expected);
    }

    #[test]
    fn test_block_time_out_of_range_clamps_to_epoch() {
        let block = ScanBlock {
            number: 1,
            timestamp: u64::MAX,
            hash: B256::ZERO,
        };
        assert_eq!(block.block_time(), DateTime::UNIX_EPOCH);
    }

    // ==================== from_envelope tests ====================

    #[test]
    fn test_from_envelope_extracts_fields() {
        let signer = PrivateKeySigner::random();
        let to = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
        let value = U256::from(1_000_000_000_000_000_000u128);
        let envelope = signed_legacy_envelope(&signer, 7, Some(to), value);

        let txn = ScanTransaction::from_envelope(envelope).unwrap();

        assert_eq!(txn.chain_id, Some(1));
        assert_eq!(txn.recipient, Some(to));
        assert_eq!(txn.value, value);
        assert_eq!(txn.nonce, 7);
        assert!(txn.envelope.is_some());
    }

    #[test]
    fn test_from_envelope_contract_creation_has_no_recipient() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_legacy_envelope(&signer, 0, None, U256::ZERO);

        let txn = ScanTransaction::from_envelope(envelope).unwrap();

        assert_eq!(txn.recipient, None);
    }

    // ==================== decode_transaction tests ====================

    #[test]
    fn test_decode_empty_input_returns_error() {
        let result = decode_transaction(&[]);
        assert!(matches!(result, Err(DecodeError::EmptyInput)));
    }

    #[test]
    fn test_decode_invalid_rlp_returns_error() {
        let invalid_rlp = hex_to_bytes("0xffffffff").unwrap();
        let result = decode_transaction(&invalid_rlp);
        assert!(matches!(result, Err(DecodeError::RlpDecode(_))));
    }

    // ==================== hex_to_bytes tests ====================

    #[test]
    fn test_hex_to_bytes_with_prefix() {
        assert_eq!(hex_to_bytes("0xdeadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_hex_to_bytes_without_prefix() {
        assert_eq!(hex_to_bytes("deadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_hex_to_bytes_invalid() {
        assert!(hex_to_bytes("0xGGGG").is_err());
    }

    #[test]
    fn test_decode_roundtrip_preserves_fields() {
        let signer = PrivateKeySigner::random();
        let to = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let value = U256::from(42u64);
        let envelope = signed_legacy_envelope(&signer, 3, Some(to), value);

        let mut raw = Vec::new();
        envelope.encode(&mut raw);
        let txn = decode_transaction(&raw).unwrap();

        assert_eq!(txn.hash, *envelope.tx_hash());
        assert_eq!(txn.recipient, Some(to));
        assert_eq!(txn.value, value);
        assert_eq!(txn.nonce, 3);
    }

    // ==================== recover_sender tests ====================

    #[test]
    fn test_recover_sender_returns_signer_address() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_legacy_envelope(&signer, 1, None, U256::ZERO);

        let sender = recover_sender(&envelope).unwrap();

        assert_eq!(sender, signer.address());
    }

    #[test]
    fn test_recover_sender_after_decode_roundtrip() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_legacy_envelope(&signer, 1, None, U256::from(5u64));

        let mut raw = Vec::new();
        envelope.encode(&mut raw);
        let txn = decode_transaction(&raw).unwrap();

        let sender = recover_sender(txn.envelope.as_ref().unwrap()).unwrap();
        assert_eq!(sender, signer.address());
    }
}
