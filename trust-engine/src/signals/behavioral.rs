//! Behavioral signal collector
//!
//! Derives account age, refund rate, spend regularity and burstiness from
//! the fan's purchase history, all relative to the request timestamp so the
//! result is reproducible.

use super::{BehavioralSignals, SignalCollector, SignalKind};
use crate::types::VerificationRequest;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Purchases needed before spending consistency is meaningful
const MIN_PURCHASES_FOR_CONSISTENCY: usize = 3;

/// Points of velocity score per purchase in the trailing day
const VELOCITY_POINTS_PER_PURCHASE: u32 = 10;

/// Raw purchase history for a fan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanHistory {
    /// Registration time
    pub account_created_at: DateTime<Utc>,
    /// Purchases with their time and amount
    pub purchases: Vec<(DateTime<Utc>, Decimal)>,
    /// Refund times
    pub refunds: Vec<DateTime<Utc>>,
}

/// Fan history capability
#[async_trait]
pub trait FanHistorySource: Send + Sync {
    /// History for a fan, `None` if the fan is unknown
    async fn fan_history(&self, fan_id: &str) -> Result<Option<FanHistory>>;
}

/// Collects [`BehavioralSignals`]
pub struct BehavioralCollector {
    source: Arc<dyn FanHistorySource>,
}

impl BehavioralCollector {
    /// Create new behavioral collector
    pub fn new(source: Arc<dyn FanHistorySource>) -> Self {
        Self { source }
    }
}

/// Derive signals from history as seen at `as_of`
pub fn derive_signals(history: &FanHistory, as_of: DateTime<Utc>) -> BehavioralSignals {
    let day_ago = as_of - Duration::hours(24);
    let purchases: Vec<_> = history
        .purchases
        .iter()
        .filter(|(at, _)| *at <= as_of)
        .collect();
    let refunds: Vec<_> = history.refunds.iter().filter(|at| **at <= as_of).collect();

    let account_age_days = days_between(history.account_created_at, as_of);
    let platform_tenure_days = purchases
        .iter()
        .map(|(at, _)| *at)
        .min()
        .map(|first| days_between(first, as_of));

    let refund_rate_pct = if purchases.is_empty() {
        None
    } else {
        let rate = refunds.len() as f64 * 100.0 / purchases.len() as f64;
        Some(rate.round().min(100.0) as u8)
    };

    let amounts: Vec<f64> = purchases.iter().filter_map(|(_, a)| a.to_f64()).collect();
    let spending_consistency = consistency(&amounts);

    let recent = purchases.iter().filter(|(at, _)| *at > day_ago).count() as u32;
    let velocity_score = Some((recent * VELOCITY_POINTS_PER_PURCHASE).min(100) as u8);

    let refunds_last_24h = Some(refunds.iter().filter(|at| ***at > day_ago).count() as u32);

    BehavioralSignals {
        account_age_days: Some(account_age_days),
        spending_consistency,
        refund_rate_pct,
        velocity_score,
        platform_tenure_days,
        refunds_last_24h,
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    (to - from).num_days().max(0) as u32
}

/// 100 minus the coefficient of variation (as a percentage) of spend amounts
fn consistency(amounts: &[f64]) -> Option<u8> {
    if amounts.len() < MIN_PURCHASES_FOR_CONSISTENCY {
        return None;
    }
    let n = amounts.len() as f64;
    let mean = amounts.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    Some((100.0 - cv * 100.0).clamp(0.0, 100.0).round() as u8)
}

#[async_trait]
impl SignalCollector for BehavioralCollector {
    type Signal = BehavioralSignals;

    fn kind(&self) -> SignalKind {
        SignalKind::Behavioral
    }

    fn cache_key(&self, request: &VerificationRequest) -> Option<String> {
        Some(format!("behavioral:{}", request.fan_id))
    }

    async fn collect(&self, request: &VerificationRequest) -> Result<BehavioralSignals> {
        Ok(self
            .source
            .fan_history(&request.fan_id)
            .await?
            .map(|history| derive_signals(&history, request.proof.timestamp))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_established_fan() {
        let at = now();
        let history = FanHistory {
            account_created_at: at - Duration::days(500),
            purchases: (0..50)
                .map(|i| (at - Duration::days(400 - i * 8), Decimal::from(10)))
                .collect(),
            refunds: vec![at - Duration::days(100)],
        };

        let signals = derive_signals(&history, at);
        assert_eq!(signals.account_age_days, Some(500));
        assert_eq!(signals.refund_rate_pct, Some(2));
        assert_eq!(signals.spending_consistency, Some(100));
        assert_eq!(signals.platform_tenure_days, Some(400));
        assert_eq!(signals.refunds_last_24h, Some(0));
        assert_eq!(signals.velocity_score, Some(0));
    }

    #[test]
    fn test_bursty_refunder() {
        let at = now();
        let history = FanHistory {
            account_created_at: at - Duration::days(3),
            purchases: vec![
                (at - Duration::hours(5), Decimal::from(5)),
                (at - Duration::hours(4), Decimal::from(200)),
                (at - Duration::hours(3), Decimal::from(50)),
            ],
            refunds: vec![at - Duration::hours(2), at - Duration::hours(1)],
        };

        let signals = derive_signals(&history, at);
        assert_eq!(signals.account_age_days, Some(3));
        assert_eq!(signals.refund_rate_pct, Some(67));
        assert_eq!(signals.velocity_score, Some(30));
        assert_eq!(signals.refunds_last_24h, Some(2));
        assert!(signals.spending_consistency.unwrap() < 30);
    }

    #[test]
    fn test_events_after_as_of_are_ignored() {
        let at = now();
        let history = FanHistory {
            account_created_at: at - Duration::days(10),
            purchases: vec![(at + Duration::hours(1), Decimal::from(5))],
            refunds: vec![at + Duration::hours(2)],
        };

        let signals = derive_signals(&history, at);
        assert_eq!(signals.refund_rate_pct, None);
        assert_eq!(signals.refunds_last_24h, Some(0));
        assert_eq!(signals.platform_tenure_days, None);
    }
}
