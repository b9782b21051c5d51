//! Crypto processor adapter
//!
//! Matches proofs against on-chain transfers. Transaction hashes compare
//! case-insensitively with or without a `0x` prefix.

use crate::book::{amount_agrees, within, RecordBook};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trust_engine::{PaymentMethodKind, ProcessorAdapter, ProcessorMatch, TransactionProof};

/// Confidence for a confirmed hash match
pub const CONFIRMED_HASH_CONFIDENCE: u8 = 98;

/// Confidence for a hash match still awaiting confirmations
pub const PENDING_HASH_CONFIDENCE: u8 = 60;

/// Confidence for email + amount inside the window
pub const ACCOUNT_CONFIDENCE: u8 = 60;

/// On-chain transfer credited to the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransfer {
    /// Transaction hash
    pub tx_hash: String,
    /// Email of the paying account
    pub email: String,
    /// Amount credited, in settlement currency
    pub amount: Decimal,
    /// Settlement currency
    pub currency: String,
    /// Confirmations seen
    pub confirmations: u32,
    /// Broadcast time
    pub created_at: DateTime<Utc>,
}

/// Crypto processor (Coinbase Commerce, ...)
pub struct CryptoProcessorAdapter {
    name: String,
    transfers: RecordBook<ChainTransfer>,
    required_confirmations: u32,
    match_window: Duration,
}

fn normalize_hash(hash: &str) -> String {
    let lower = hash.trim().to_ascii_lowercase();
    lower.strip_prefix("0x").map(str::to_string).unwrap_or(lower)
}

impl CryptoProcessorAdapter {
    /// Create new crypto adapter registered as `name`
    pub fn new(name: impl Into<String>, required_confirmations: u32, match_window: Duration) -> Self {
        Self {
            name: name.into(),
            transfers: RecordBook::new(),
            required_confirmations,
            match_window,
        }
    }

    /// Record an incoming transfer
    pub fn record_transfer(&self, transfer: ChainTransfer) {
        self.transfers.push(transfer);
    }

    fn score(&self, transfer: &ChainTransfer, proof: &TransactionProof) -> Option<u8> {
        if !amount_agrees(proof.amount, transfer.amount) {
            return None;
        }
        if let Some(hash) = &proof.transaction_ref {
            if normalize_hash(hash) == normalize_hash(&transfer.tx_hash) {
                return Some(if transfer.confirmations >= self.required_confirmations {
                    CONFIRMED_HASH_CONFIDENCE
                } else {
                    PENDING_HASH_CONFIDENCE
                });
            }
        }
        if proof.amount.is_some()
            && transfer.email.eq_ignore_ascii_case(&proof.email)
            && within(proof.timestamp, transfer.created_at, self.match_window)
        {
            return Some(ACCOUNT_CONFIDENCE);
        }
        None
    }
}

#[async_trait]
impl ProcessorAdapter for CryptoProcessorAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, method: PaymentMethodKind) -> bool {
        method == PaymentMethodKind::Crypto
    }

    async fn lookup_transaction(
        &self,
        proof: &TransactionProof,
    ) -> trust_engine::Result<Option<ProcessorMatch>> {
        Ok(self
            .transfers
            .best(|t| self.score(t, proof))
            .map(|(transfer, confidence)| ProcessorMatch {
                processor_reference: transfer.tx_hash,
                confidence,
                amount: Some(transfer.amount),
                currency: Some(transfer.currency),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer(confirmations: u32) -> ChainTransfer {
        ChainTransfer {
            tx_hash: "0xABC123".to_string(),
            email: "fan42@example.com".to_string(),
            amount: dec!(25),
            currency: "USD".to_string(),
            confirmations,
            created_at: Utc::now(),
        }
    }

    fn proof(hash: Option<&str>) -> TransactionProof {
        TransactionProof {
            email: "fan42@example.com".to_string(),
            timestamp: Utc::now(),
            transaction_ref: hash.map(str::to_string),
            card_last4: None,
            device_fingerprint: None,
            ip_address: None,
            amount: Some(dec!(25)),
        }
    }

    #[tokio::test]
    async fn test_hash_match_depends_on_confirmations() {
        let adapter = CryptoProcessorAdapter::new("coinbase", 3, Duration::minutes(30));
        adapter.record_transfer(transfer(1));

        let found = adapter.lookup_transaction(&proof(Some("abc123"))).await.unwrap().unwrap();
        assert_eq!(found.confidence, PENDING_HASH_CONFIDENCE);

        let confirmed = CryptoProcessorAdapter::new("coinbase", 3, Duration::minutes(30));
        confirmed.record_transfer(transfer(6));
        let found = confirmed.lookup_transaction(&proof(Some("0xabc123"))).await.unwrap().unwrap();
        assert_eq!(found.confidence, CONFIRMED_HASH_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_account_match_without_hash() {
        let adapter = CryptoProcessorAdapter::new("coinbase", 3, Duration::minutes(30));
        adapter.record_transfer(transfer(6));

        let found = adapter.lookup_transaction(&proof(None)).await.unwrap().unwrap();
        assert_eq!(found.confidence, ACCOUNT_CONFIDENCE);

        let mut other = proof(Some("0xdead"));
        other.email = "someone@example.com".to_string();
        assert!(adapter.lookup_transaction(&other).await.unwrap().is_none());
    }
}
