//! Bank transfer / payout adapter

use crate::book::{amount_agrees, within, RecordBook};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trust_engine::{PaymentMethodKind, ProcessorAdapter, ProcessorMatch, TransactionProof};

/// Confidence for a payment reference match
pub const REFERENCE_CONFIDENCE: u8 = 90;

/// Confidence for remitter email + amount inside the window
pub const REMITTER_CONFIDENCE: u8 = 70;

/// Credit received on the platform's bank account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankCredit {
    /// Payment reference quoted by the remitter
    pub reference: String,
    /// Remitter email
    pub email: String,
    /// Amount
    pub amount: Decimal,
    /// ISO 4217 currency
    pub currency: String,
    /// Value date
    pub received_at: DateTime<Utc>,
}

/// Bank rail adapter (Wise, SEPA, ACH, ...)
pub struct BankTransferAdapter {
    name: String,
    credits: RecordBook<BankCredit>,
    match_window: Duration,
}

impl BankTransferAdapter {
    /// Create new bank adapter registered as `name`
    pub fn new(name: impl Into<String>, match_window: Duration) -> Self {
        Self {
            name: name.into(),
            credits: RecordBook::new(),
            match_window,
        }
    }

    /// Record a received credit
    pub fn record_credit(&self, credit: BankCredit) {
        self.credits.push(credit);
    }

    fn score(&self, credit: &BankCredit, proof: &TransactionProof) -> Option<u8> {
        if !amount_agrees(proof.amount, credit.amount) {
            return None;
        }
        // Bank references are often re-keyed by hand
        let reference = proof
            .transaction_ref
            .as_deref()
            .map(|r| r.trim().replace(' ', "").to_ascii_uppercase());
        if reference.as_deref() == Some(credit.reference.replace(' ', "").to_ascii_uppercase().as_str()) {
            return Some(REFERENCE_CONFIDENCE);
        }
        if proof.amount.is_some()
            && credit.email.eq_ignore_ascii_case(&proof.email)
            && within(proof.timestamp, credit.received_at, self.match_window)
        {
            return Some(REMITTER_CONFIDENCE);
        }
        None
    }
}

#[async_trait]
impl ProcessorAdapter for BankTransferAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, method: PaymentMethodKind) -> bool {
        method == PaymentMethodKind::BankTransfer
    }

    async fn lookup_transaction(
        &self,
        proof: &TransactionProof,
    ) -> trust_engine::Result<Option<ProcessorMatch>> {
        Ok(self
            .credits
            .best(|c| self.score(c, proof))
            .map(|(credit, confidence)| ProcessorMatch {
                processor_reference: credit.reference,
                confidence,
                amount: Some(credit.amount),
                currency: Some(credit.currency),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_reference_match_ignores_spacing_and_case() {
        let adapter = BankTransferAdapter::new("wise", Duration::days(3));
        adapter.record_credit(BankCredit {
            reference: "FV 2026 0042".to_string(),
            email: "fan42@example.com".to_string(),
            amount: dec!(120),
            currency: "EUR".to_string(),
            received_at: Utc::now() - Duration::days(1),
        });

        let proof = TransactionProof {
            email: "other@example.com".to_string(),
            timestamp: Utc::now(),
            transaction_ref: Some("fv20260042".to_string()),
            card_last4: None,
            device_fingerprint: None,
            ip_address: None,
            amount: None,
        };
        let found = adapter.lookup_transaction(&proof).await.unwrap().unwrap();
        assert_eq!(found.confidence, REFERENCE_CONFIDENCE);
        assert_eq!(found.currency.as_deref(), Some("EUR"));

        // Remitter fallback needs a claimed amount
        let remitter = TransactionProof {
            email: "fan42@example.com".to_string(),
            transaction_ref: None,
            amount: Some(dec!(120)),
            ..proof
        };
        let found = adapter.lookup_transaction(&remitter).await.unwrap().unwrap();
        assert_eq!(found.confidence, REMITTER_CONFIDENCE);
    }
}
