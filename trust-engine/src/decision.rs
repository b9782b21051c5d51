//! Verification decision engine
//!
//! Maps a score, its confidence and the signals behind it to
//! verified / suspicious / rejected. Everything here is a pure function of
//! its inputs so audit replay reproduces decisions exactly.

use crate::config::EngineConfig;
use crate::scoring::{bin_country_mismatch, ScoreBreakdown};
use crate::signals::{PlatformRiskLevel, RiskSignals};
use crate::types::{CrossReferenceResult, DecisionExplanation, VerificationDecision, VerificationStatus};
use tracing::warn;

/// Method risk at or above which the payment method is itself a risk factor
const HIGH_METHOD_RISK: u8 = 40;

/// Minimum reputation for a device or IP to count in the fan's favour
const TRUSTED_REPUTATION: u8 = 80;

/// Fail-safe code for an overall timeout
pub const VERIFICATION_TIMEOUT: &str = "verification_timeout";

/// Fail-safe code for an infrastructure failure
pub const INFRASTRUCTURE_UNAVAILABLE: &str = "infrastructure_unavailable";

/// Fail-safe code for an audit write failure
pub const AUDIT_UNAVAILABLE: &str = "audit_unavailable";

impl VerificationDecision {
    /// `suspicious` decision used when evaluation could not finish
    pub fn fail_safe(code: &str) -> Self {
        Self {
            status: VerificationStatus::Suspicious,
            risk_factors: vec![code.to_string()],
            next_actions: vec!["manual_review".to_string()],
            explanation: DecisionExplanation {
                primary_factors: Vec::new(),
                risk_factors: vec![describe(code)],
                protective_factors: Vec::new(),
                recommendations: vec![
                    "Hold the transaction until an operator has reviewed it".to_string(),
                ],
            },
        }
    }
}

/// Machine-readable risk codes, in a fixed order
pub fn risk_factors(
    signals: &RiskSignals,
    cross_reference: &CrossReferenceResult,
    config: &EngineConfig,
) -> Vec<String> {
    let mut factors = Vec::new();
    let mut flag = |condition: bool, code: &str| {
        if condition {
            factors.push(code.to_string());
        }
    };

    let device = &signals.device;
    flag(
        device.velocity_per_hour.unwrap_or(0) > config.device.hourly_velocity_cap,
        "high_velocity",
    );
    flag(device.is_new, "new_device");
    flag(!device.flags.is_empty(), "suspicious_device_pattern");

    let network = &signals.network;
    flag(network.is_anonymizer, "tor_vpn_detected");
    flag(network.known_malicious, "malicious_ip");
    flag(network.is_suspicious_isp, "suspicious_isp");
    flag(
        network.geo_velocity_kmh.unwrap_or(0) > config.network.geovelocity_limit_kmh,
        "impossible_travel",
    );
    flag(
        network.country_risk.unwrap_or(0) > config.network.country_risk_limit,
        "high_risk_country",
    );

    let payment = &signals.payment;
    flag(payment.risk_score.unwrap_or(0) >= HIGH_METHOD_RISK, "payment_method_risk");
    flag(payment.avs_match == Some(false), "avs_mismatch");
    flag(payment.cvv_match == Some(false), "cvv_mismatch");
    flag(payment.is_prepaid == Some(true), "prepaid_card");
    flag(bin_country_mismatch(payment, network), "bin_country_mismatch");

    let behavioral = &signals.behavioral;
    let rules = &config.behavioral;
    flag(
        behavioral.account_age_days.map_or(false, |d| d < rules.new_account_days),
        "new_account",
    );
    flag(
        behavioral.refund_rate_pct.map_or(false, |r| r > rules.high_refund_rate_pct),
        "high_refund_rate",
    );
    flag(
        behavioral.spending_consistency.map_or(false, |c| c < rules.erratic_spending),
        "unusual_spending",
    );
    flag(
        behavioral.velocity_score.map_or(false, |v| v > rules.velocity_limit),
        "purchase_burst",
    );

    flag(
        signals.platform.risk_level == Some(PlatformRiskLevel::High),
        "high_platform_risk",
    );
    flag(!cross_reference.found, "no_processor_match");

    for kind in &signals.unavailable {
        factors.push(format!("{}_data_unavailable", kind));
    }

    factors
}

/// Evidence in the transaction's favour, human-readable
pub fn protective_factors(
    signals: &RiskSignals,
    cross_reference: &CrossReferenceResult,
    config: &EngineConfig,
) -> Vec<String> {
    let mut factors = Vec::new();

    if cross_reference.found {
        factors.push(format!(
            "Payment corroborated by {} ({}% match)",
            cross_reference.processor.as_deref().unwrap_or("processor"),
            cross_reference.confidence
        ));
    }

    let device = &signals.device;
    if device.reputation.unwrap_or(0) >= TRUSTED_REPUTATION && !device.is_new && device.flags.is_empty() {
        factors.push("Known device with good reputation".to_string());
    }

    let network = &signals.network;
    if network.ip_reputation.unwrap_or(0) >= TRUSTED_REPUTATION
        && !network.is_anonymizer
        && !network.is_suspicious_isp
        && !network.known_malicious
    {
        factors.push("Clean IP address".to_string());
    }

    let behavioral = &signals.behavioral;
    if let Some(age) = behavioral.account_age_days {
        if age > config.behavioral.established_age_days {
            factors.push(format!("Established account ({} days)", age));
        }
    }
    if let Some(rate) = behavioral.refund_rate_pct {
        if rate < config.behavioral.low_refund_rate_pct {
            factors.push(format!("Low refund rate ({}%)", rate));
        }
    }

    factors
}

/// Decide a verification
pub fn decide(
    signals: &RiskSignals,
    cross_reference: &CrossReferenceResult,
    breakdown: &ScoreBreakdown,
    config: &EngineConfig,
) -> VerificationDecision {
    let thresholds = &config.decision;
    let score = breakdown.trust_score;
    let risk_codes = risk_factors(signals, cross_reference, config);

    let critical: Vec<&String> = risk_codes
        .iter()
        .filter(|code| thresholds.critical_factors.contains(code))
        .collect();

    let status = if !critical.is_empty() {
        warn!(
            "Critical override to rejected (score {}): {:?}",
            score.score, critical
        );
        VerificationStatus::Rejected
    } else if score.score >= thresholds.auto_approve_score
        && score.confidence >= thresholds.auto_approve_confidence
    {
        VerificationStatus::Verified
    } else if score.score < thresholds.reject_score || score.confidence < thresholds.reject_confidence {
        VerificationStatus::Rejected
    } else {
        VerificationStatus::Suspicious
    };

    let next_actions = next_actions(status, &risk_codes, !critical.is_empty());

    let mut ranked: Vec<_> = breakdown.factors.iter().filter(|f| f.weight > 0.0).collect();
    ranked.sort_by(|a, b| {
        b.contribution()
            .partial_cmp(&a.contribution())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let primary_factors = ranked
        .iter()
        .map(|f| format!("{}: {} (weight {:.2})", f.name, f.score, f.weight))
        .collect();

    let explanation = DecisionExplanation {
        primary_factors,
        risk_factors: risk_codes.iter().map(|c| describe(c)).collect(),
        protective_factors: protective_factors(signals, cross_reference, config),
        recommendations: recommendations(status, &risk_codes),
    };

    VerificationDecision {
        status,
        risk_factors: risk_codes,
        next_actions,
        explanation,
    }
}

fn next_actions(status: VerificationStatus, risks: &[String], critical: bool) -> Vec<String> {
    let has = |code: &str| risks.iter().any(|r| r == code);
    let mut actions: Vec<&str> = Vec::new();

    match status {
        VerificationStatus::Verified => {
            actions.push("allow_transaction");
            if !risks.is_empty() {
                actions.push("monitor_account");
            }
        }
        VerificationStatus::Suspicious => {
            actions.push("manual_review");
            actions.push("request_additional_verification");
            if has("no_processor_match") {
                actions.push("request_payment_proof");
            }
            if has("high_velocity") || has("purchase_burst") {
                actions.push("apply_velocity_limit");
            }
        }
        VerificationStatus::Rejected => {
            actions.push("block_transaction");
            actions.push("notify_fraud_team");
            if critical {
                actions.push("flag_account");
            }
        }
    }

    actions.into_iter().map(String::from).collect()
}

fn recommendations(status: VerificationStatus, risks: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    match status {
        VerificationStatus::Verified => out.push("Proceed with the payment".to_string()),
        VerificationStatus::Suspicious => {
            out.push("Review the transaction before releasing it".to_string());
            if risks.iter().any(|r| r == "no_processor_match") {
                out.push("Ask the fan for a processor receipt".to_string());
            }
        }
        VerificationStatus::Rejected => {
            out.push("Block the payment and notify the fan".to_string());
            if risks.iter().any(|r| r == "tor_vpn_detected") {
                out.push("Ask the fan to retry without a VPN or proxy".to_string());
            }
        }
    }
    out
}

/// Human-readable text for a risk code
pub fn describe(code: &str) -> String {
    let text = match code {
        "high_velocity" => "Too many transactions from this device in the last hour",
        "new_device" => "Device seen for the first time",
        "suspicious_device_pattern" => "Device shows signs of tampering or emulation",
        "tor_vpn_detected" => "Connection through Tor, VPN or proxy",
        "malicious_ip" => "IP address listed as malicious",
        "suspicious_isp" => "Connection from a hosting provider",
        "impossible_travel" => "Location changed faster than physically possible",
        "high_risk_country" => "Connection from a high-risk country",
        "payment_method_risk" => "Payment method carries elevated risk",
        "avs_mismatch" => "Billing address did not verify",
        "cvv_mismatch" => "Card security code did not verify",
        "prepaid_card" => "Prepaid card",
        "bin_country_mismatch" => "Card issued in a different country from the connection",
        "new_account" => "Account created recently",
        "high_refund_rate" => "High historical refund rate",
        "unusual_spending" => "Spending pattern is irregular",
        "purchase_burst" => "Burst of purchases in the last day",
        "high_platform_risk" => "High-risk platform",
        "no_processor_match" => "No processor record corroborates the payment",
        VERIFICATION_TIMEOUT => "Verification did not finish in time",
        INFRASTRUCTURE_UNAVAILABLE => "Verification could not be completed",
        AUDIT_UNAVAILABLE => "Decision could not be recorded",
        other => {
            if let Some(kind) = other.strip_suffix("_data_unavailable") {
                return format!("No {} data available", kind);
            }
            return other.replace('_', " ");
        }
    };
    text.to_string()
}
