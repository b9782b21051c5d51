//! Payment instrument signal collector

use super::{PaymentSignals, SignalCollector, SignalKind};
use crate::config::PaymentRules;
use crate::types::{PaymentMethodKind, VerificationRequest};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Card verification results from the issuer side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CardCheckReport {
    /// Address verification outcome
    pub avs_match: Option<bool>,
    /// Card security code outcome
    pub cvv_match: Option<bool>,
    /// Issuing country from the BIN
    pub bin_country: Option<String>,
    /// Prepaid BIN
    pub is_prepaid: Option<bool>,
}

/// Card check capability
#[async_trait]
pub trait CardChecks: Send + Sync {
    /// Latest check results for a fan's card
    async fn card_checks(&self, fan_id: &str, card_last4: &str) -> Result<Option<CardCheckReport>>;
}

/// Collects [`PaymentSignals`]
pub struct PaymentCollector {
    checks: Arc<dyn CardChecks>,
    rules: PaymentRules,
}

impl PaymentCollector {
    /// Create new payment collector
    pub fn new(checks: Arc<dyn CardChecks>, rules: PaymentRules) -> Self {
        Self { checks, rules }
    }

    fn method_risk(&self, method: PaymentMethodKind) -> u8 {
        let risk = match method {
            PaymentMethodKind::Card => self.rules.card_risk,
            PaymentMethodKind::Crypto => self.rules.crypto_risk,
            PaymentMethodKind::BankTransfer => self.rules.bank_transfer_risk,
            PaymentMethodKind::Wallet => self.rules.wallet_risk,
        };
        risk.min(100)
    }
}

#[async_trait]
impl SignalCollector for PaymentCollector {
    type Signal = PaymentSignals;

    fn kind(&self) -> SignalKind {
        SignalKind::Payment
    }

    fn cache_key(&self, request: &VerificationRequest) -> Option<String> {
        Some(format!(
            "payment:{}:{}:{}",
            request.fan_id,
            request.payment_method,
            request.proof.card_last4.as_deref().unwrap_or("-")
        ))
    }

    async fn collect(&self, request: &VerificationRequest) -> Result<PaymentSignals> {
        let method = request.payment_method;
        let mut signals = PaymentSignals {
            method: Some(method),
            risk_score: Some(self.method_risk(method)),
            ..Default::default()
        };

        if method != PaymentMethodKind::Card {
            return Ok(signals);
        }

        if let Some(last4) = &request.proof.card_last4 {
            if let Some(report) = self.checks.card_checks(&request.fan_id, last4).await? {
                signals.avs_match = report.avs_match;
                signals.cvv_match = report.cvv_match;
                signals.bin_country = report.bin_country;
                signals.is_prepaid = report.is_prepaid;
            }
        }

        Ok(signals)
    }
}
