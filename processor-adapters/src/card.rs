//! Card processor adapter
//!
//! Matches proofs against settled card charges. A charge id match is
//! near-certain; email plus last four digits inside the time window is a
//! weaker match.

use crate::book::{amount_agrees, within, RecordBook};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trust_engine::{PaymentMethodKind, ProcessorAdapter, ProcessorMatch, TransactionProof};

/// Confidence for a charge id match
pub const CHARGE_ID_CONFIDENCE: u8 = 95;

/// Confidence for email + last4 inside the window
pub const CARD_DETAILS_CONFIDENCE: u8 = 70;

/// Settled card charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardCharge {
    /// Processor charge id
    pub charge_id: String,
    /// Billing email
    pub email: String,
    /// Last four card digits
    pub card_last4: String,
    /// Amount
    pub amount: Decimal,
    /// ISO 4217 currency
    pub currency: String,
    /// Capture time
    pub created_at: DateTime<Utc>,
}

/// Card processor (Stripe, CCBill, Segpay, ...)
pub struct CardProcessorAdapter {
    name: String,
    charges: RecordBook<CardCharge>,
    match_window: Duration,
}

impl CardProcessorAdapter {
    /// Create new card adapter registered as `name`
    pub fn new(name: impl Into<String>, match_window: Duration) -> Self {
        Self {
            name: name.into(),
            charges: RecordBook::new(),
            match_window,
        }
    }

    /// Record a settled charge
    pub fn record_charge(&self, charge: CardCharge) -> Result<()> {
        if charge.card_last4.len() != 4 || !charge.card_last4.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidRecord(format!(
                "charge {} has malformed last4",
                charge.charge_id
            )));
        }
        self.charges.push(charge);
        Ok(())
    }

    /// Number of charges on file
    pub fn charge_count(&self) -> usize {
        self.charges.len()
    }

    fn score(&self, charge: &CardCharge, proof: &TransactionProof) -> Option<u8> {
        if !amount_agrees(proof.amount, charge.amount) {
            return None;
        }
        if proof.transaction_ref.as_deref() == Some(charge.charge_id.as_str()) {
            return Some(CHARGE_ID_CONFIDENCE);
        }
        let same_card = proof.card_last4.as_deref() == Some(charge.card_last4.as_str());
        if same_card
            && charge.email.eq_ignore_ascii_case(&proof.email)
            && within(proof.timestamp, charge.created_at, self.match_window)
        {
            return Some(CARD_DETAILS_CONFIDENCE);
        }
        None
    }
}

#[async_trait]
impl ProcessorAdapter for CardProcessorAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, method: PaymentMethodKind) -> bool {
        matches!(method, PaymentMethodKind::Card | PaymentMethodKind::Wallet)
    }

    async fn lookup_transaction(
        &self,
        proof: &TransactionProof,
    ) -> trust_engine::Result<Option<ProcessorMatch>> {
        let found = self.charges.best(|c| self.score(c, proof));
        debug!("{} card lookup matched: {}", self.name, found.is_some());
        Ok(found.map(|(charge, confidence)| ProcessorMatch {
            processor_reference: charge.charge_id,
            confidence,
            amount: Some(charge.amount),
            currency: Some(charge.currency),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn charge(id: &str, at: DateTime<Utc>) -> CardCharge {
        CardCharge {
            charge_id: id.to_string(),
            email: "Fan42@Example.com".to_string(),
            card_last4: "4242".to_string(),
            amount: dec!(9.99),
            currency: "USD".to_string(),
            created_at: at,
        }
    }

    fn proof(at: DateTime<Utc>) -> TransactionProof {
        TransactionProof {
            email: "fan42@example.com".to_string(),
            timestamp: at,
            transaction_ref: None,
            card_last4: Some("4242".to_string()),
            device_fingerprint: None,
            ip_address: None,
            amount: Some(dec!(9.99)),
        }
    }

    #[tokio::test]
    async fn test_charge_id_beats_card_details() {
        let now = Utc::now();
        let adapter = CardProcessorAdapter::new("stripe", Duration::minutes(15));
        adapter.record_charge(charge("ch_1", now)).unwrap();
        adapter.record_charge(charge("ch_2", now)).unwrap();

        let mut by_ref = proof(now);
        by_ref.transaction_ref = Some("ch_2".to_string());
        let found = adapter.lookup_transaction(&by_ref).await.unwrap().unwrap();
        assert_eq!(found.processor_reference, "ch_2");
        assert_eq!(found.confidence, CHARGE_ID_CONFIDENCE);

        let found = adapter.lookup_transaction(&proof(now)).await.unwrap().unwrap();
        assert_eq!(found.processor_reference, "ch_1");
        assert_eq!(found.confidence, CARD_DETAILS_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_outside_window_or_wrong_amount_misses() {
        let now = Utc::now();
        let adapter = CardProcessorAdapter::new("ccbill", Duration::minutes(15));
        adapter.record_charge(charge("ch_1", now - Duration::hours(2))).unwrap();
        assert!(adapter.lookup_transaction(&proof(now)).await.unwrap().is_none());

        adapter.record_charge(charge("ch_2", now)).unwrap();
        let mut wrong_amount = proof(now);
        wrong_amount.amount = Some(dec!(19.99));
        assert!(adapter.lookup_transaction(&wrong_amount).await.unwrap().is_none());
    }

    #[test]
    fn test_malformed_last4_rejected() {
        let adapter = CardProcessorAdapter::new("stripe", Duration::minutes(15));
        let mut bad = charge("ch_1", Utc::now());
        bad.card_last4 = "42".to_string();
        assert!(adapter.record_charge(bad).is_err());
        assert_eq!(adapter.charge_count(), 0);
        assert!(adapter.supports(PaymentMethodKind::Wallet));
        assert!(!adapter.supports(PaymentMethodKind::Crypto));
    }
}
