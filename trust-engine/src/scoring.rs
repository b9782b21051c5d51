//! Trust score calculator
//!
//! Each signal bundle is turned into a 0-100 sub-score by a fixed rule
//! table, the sub-scores are weighted, and a separate confidence value
//! records how much evidence was actually available.

use crate::config::{BehavioralRules, DeviceRules, EngineConfig, NetworkRules, PaymentRules, PlatformRules};
use crate::signals::{
    BehavioralSignals, DeviceSignals, NetworkSignals, PaymentSignals, PlatformRiskLevel,
    PlatformSignals, RiskSignals, SignalKind, NEUTRAL_SCORE,
};
use crate::types::{CrossReferenceResult, TrustScore};
use serde::{Deserialize, Serialize};

const BASIS_POINTS: i64 = 10_000;

/// One weighted input to the score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactor {
    /// Input name (cross_reference, device, ...)
    pub name: String,
    /// Weight applied
    pub weight: f64,
    /// Sub-score, 0-100
    pub score: u8,
}

impl ScoreFactor {
    /// Weighted contribution to the final score
    pub fn contribution(&self) -> f64 {
        self.weight * self.score as f64
    }
}

/// Trust score plus the factors behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Final score
    pub trust_score: TrustScore,
    /// Inputs in fixed order: cross_reference, device, network, payment, behavioral, platform
    pub factors: Vec<ScoreFactor>,
}

impl ScoreBreakdown {
    /// Sub-score for a named factor
    pub fn factor(&self, name: &str) -> Option<u8> {
        self.factors.iter().find(|f| f.name == name).map(|f| f.score)
    }
}

/// Trust score calculator
pub struct TrustScoreCalculator<'a> {
    config: &'a EngineConfig,
}

impl<'a> TrustScoreCalculator<'a> {
    /// Create new calculator over a configuration
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Score a request's signals
    pub fn calculate(&self, signals: &RiskSignals, cross_reference: &CrossReferenceResult) -> ScoreBreakdown {
        let cfg = self.config;
        let w = &cfg.weights;

        let sub = |kind: SignalKind, score: u8| {
            if signals.is_available(kind) {
                score
            } else {
                NEUTRAL_SCORE
            }
        };

        let cross_reference_score = if cross_reference.found {
            cross_reference.confidence.min(100)
        } else {
            0
        };

        let factors = vec![
            factor("cross_reference", w.cross_reference, cross_reference_score),
            factor("device", w.device, sub(SignalKind::Device, device_score(&signals.device, &cfg.device))),
            factor("network", w.network, sub(SignalKind::Network, network_score(&signals.network, &cfg.network))),
            factor(
                "payment",
                w.payment,
                sub(SignalKind::Payment, payment_score(&signals.payment, &signals.network, &cfg.payment)),
            ),
            factor(
                "behavioral",
                w.behavioral,
                sub(SignalKind::Behavioral, behavioral_score(&signals.behavioral, &cfg.behavioral)),
            ),
            factor("platform", w.platform, sub(SignalKind::Platform, platform_score(&signals.platform, &cfg.platform))),
        ];

        // Weights are applied in basis points so equal inputs always round the same way
        let weighted: i64 = factors
            .iter()
            .map(|f| (f.weight * BASIS_POINTS as f64).round() as i64 * f.score as i64)
            .sum();
        let score = ((weighted + BASIS_POINTS / 2) / BASIS_POINTS).clamp(0, 100) as u8;

        ScoreBreakdown {
            trust_score: TrustScore::new(score, self.confidence(signals, cross_reference)),
            factors,
        }
    }

    /// Evidence-backed confidence, 0 to the configured cap
    pub fn confidence(&self, signals: &RiskSignals, cross_reference: &CrossReferenceResult) -> u8 {
        let rules = &self.config.confidence;
        let mut confidence = rules.base;

        if cross_reference.found {
            confidence += rules.cross_reference_bonus;
        }
        if signals.is_available(SignalKind::Device) && signals.device.fingerprint.is_some() {
            confidence += rules.fingerprint_bonus;
        }
        if signals.is_available(SignalKind::Network) && signals.network.ip_reputation.is_some() {
            confidence += rules.ip_bonus;
        }
        if signals.is_available(SignalKind::Behavioral) && signals.behavioral.account_age_days.is_some() {
            confidence += rules.history_bonus;
        }

        confidence.clamp(0, rules.cap.min(crate::types::MAX_CONFIDENCE) as i32) as u8
    }
}

fn factor(name: &str, weight: f64, score: u8) -> ScoreFactor {
    ScoreFactor {
        name: name.to_string(),
        weight,
        score,
    }
}

fn clamp_score(score: i32) -> u8 {
    score.clamp(0, 100) as u8
}

/// Device sub-score
pub fn device_score(signals: &DeviceSignals, rules: &DeviceRules) -> u8 {
    let mut score = signals.reputation.unwrap_or(NEUTRAL_SCORE) as i32;
    if signals.velocity_per_hour.unwrap_or(0) > rules.hourly_velocity_cap {
        score -= rules.velocity_penalty;
    }
    if signals.is_new {
        score -= rules.new_device_penalty;
    }
    score -= rules.flag_penalty.saturating_mul(signals.flags.len().min(100) as i32);
    clamp_score(score)
}

/// Network sub-score
pub fn network_score(signals: &NetworkSignals, rules: &NetworkRules) -> u8 {
    let mut score = signals.ip_reputation.unwrap_or(NEUTRAL_SCORE) as i32;
    if signals.is_anonymizer {
        score -= rules.anonymizer_penalty;
    }
    if signals.is_suspicious_isp {
        score -= rules.suspicious_isp_penalty;
    }
    if signals.geo_velocity_kmh.unwrap_or(0) > rules.geovelocity_limit_kmh {
        score -= rules.geovelocity_penalty;
    }
    if signals.country_risk.unwrap_or(0) > rules.country_risk_limit {
        score -= rules.country_risk_penalty;
    }
    clamp_score(score)
}

/// Payment sub-score; the network bundle supplies the IP country for the BIN check
pub fn payment_score(signals: &PaymentSignals, network: &NetworkSignals, rules: &PaymentRules) -> u8 {
    let mut score = signals
        .risk_score
        .map(|risk| 100 - risk.min(100) as i32)
        .unwrap_or(NEUTRAL_SCORE as i32);
    if signals.avs_match == Some(false) {
        score -= rules.avs_mismatch_penalty;
    }
    if signals.cvv_match == Some(false) {
        score -= rules.cvv_mismatch_penalty;
    }
    if signals.is_prepaid == Some(true) {
        score -= rules.prepaid_penalty;
    }
    if bin_country_mismatch(signals, network) {
        score -= rules.bin_country_mismatch_penalty;
    }
    clamp_score(score)
}

/// BIN country and IP country both known and different
pub fn bin_country_mismatch(payment: &PaymentSignals, network: &NetworkSignals) -> bool {
    match (&payment.bin_country, &network.country) {
        (Some(bin), Some(ip)) => !bin.eq_ignore_ascii_case(ip),
        _ => false,
    }
}

/// Behavioral sub-score
pub fn behavioral_score(signals: &BehavioralSignals, rules: &BehavioralRules) -> u8 {
    let mut score = rules.neutral_score;

    if let Some(age) = signals.account_age_days {
        if age > rules.established_age_days {
            score += rules.established_bonus;
        } else if age > rules.maturing_age_days {
            score += rules.maturing_bonus;
        } else if age < rules.new_account_days {
            score -= rules.new_account_penalty;
        }
    }

    if let Some(rate) = signals.refund_rate_pct {
        if rate > rules.high_refund_rate_pct {
            score -= rules.high_refund_penalty;
        } else if rate > rules.elevated_refund_rate_pct {
            score -= rules.elevated_refund_penalty;
        } else if rate < rules.low_refund_rate_pct {
            score += rules.low_refund_bonus;
        }
    }

    if let Some(consistency) = signals.spending_consistency {
        if consistency > rules.consistent_spending {
            score += rules.consistent_spending_bonus;
        } else if consistency < rules.erratic_spending {
            score -= rules.erratic_spending_penalty;
        }
    }

    if signals.velocity_score.unwrap_or(0) > rules.velocity_limit {
        score -= rules.velocity_penalty;
    }

    if signals.platform_tenure_days.unwrap_or(0) > rules.tenure_days {
        score += rules.tenure_bonus;
    }

    clamp_score(score)
}

/// Platform sub-score
pub fn platform_score(signals: &PlatformSignals, rules: &PlatformRules) -> u8 {
    let mut score = match signals.risk_level {
        Some(PlatformRiskLevel::Low) => rules.low_risk_score,
        Some(PlatformRiskLevel::Medium) => rules.medium_risk_score,
        Some(PlatformRiskLevel::High) => rules.high_risk_score,
        None => NEUTRAL_SCORE as i32,
    };

    match signals.creator_tier.as_deref() {
        Some("new") => score -= rules.new_creator_penalty,
        Some("verified") | Some("top") => score += rules.trusted_creator_bonus,
        _ => {}
    }

    if signals.content_type.as_deref() == Some("adult") {
        score -= rules.adult_content_penalty;
    }

    clamp_score(score)
}
