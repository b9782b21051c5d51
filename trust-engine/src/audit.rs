//! Audit records and replay
//!
//! Every decision is stored with the signals and score that produced it and
//! a SHA-256 digest of the decision's JSON. Because decisions are pure
//! functions of those inputs plus configuration, [`replay`] can recompute
//! them later and report drift.

use crate::config::EngineConfig;
use crate::decision::decide;
use crate::refund;
use crate::scoring::TrustScoreCalculator;
use crate::signals::{RiskSignals, SignalKind};
use crate::types::{
    CrossReferenceResult, RefundDecision, RefundEvidence, RefundEvidenceSnapshot, TrustScore,
    VerificationDecision,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Decision held by an audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "decision", rename_all = "snake_case")]
pub enum AuditedDecision {
    /// Payment verification
    Verification(VerificationDecision),
    /// Refund policy
    Refund(RefundDecision),
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Audit key
    pub verification_id: Uuid,

    /// Transaction concerned
    pub transaction_id: Option<Uuid>,

    /// Refund concerned
    pub refund_id: Option<Uuid>,

    /// Write time
    pub recorded_at: DateTime<Utc>,

    /// Signals the score was computed from
    pub signals: RiskSignals,

    /// Cross-reference outcome
    pub cross_reference: CrossReferenceResult,

    /// Score
    pub trust_score: TrustScore,

    /// Decision
    pub decision: AuditedDecision,

    /// Fail-safe code when evaluation did not finish
    pub fail_safe: Option<String>,

    /// Hex SHA-256 of the decision JSON
    pub digest: String,
}

/// Hex SHA-256 of a decision's JSON
pub fn decision_digest(decision: &AuditedDecision) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(decision)?);
    Ok(hex::encode(hasher.finalize()))
}

impl AuditRecord {
    /// Build a record and stamp its digest
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verification_id: Uuid,
        transaction_id: Option<Uuid>,
        refund_id: Option<Uuid>,
        signals: RiskSignals,
        cross_reference: CrossReferenceResult,
        trust_score: TrustScore,
        decision: AuditedDecision,
        fail_safe: Option<String>,
    ) -> Result<Self> {
        let digest = decision_digest(&decision)?;
        Ok(Self {
            verification_id,
            transaction_id,
            refund_id,
            recorded_at: Utc::now(),
            signals,
            cross_reference,
            trust_score,
            decision,
            fail_safe,
            digest,
        })
    }

    /// Whether the stored digest still matches the stored decision
    pub fn verify_digest(&self) -> Result<bool> {
        Ok(decision_digest(&self.decision)? == self.digest)
    }
}

/// Outcome of replaying one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Record replayed
    pub verification_id: Uuid,
    /// Score recomputed from the stored signals
    pub replayed_score: TrustScore,
    /// Recomputed score equals the stored one
    pub score_matches: bool,
    /// Recomputed decision equals the stored one
    pub decision_matches: bool,
    /// Stored digest matches the stored decision
    pub digest_matches: bool,
}

impl ReplayReport {
    /// No drift and no tampering
    pub fn is_clean(&self) -> bool {
        self.score_matches && self.decision_matches && self.digest_matches
    }
}

/// Score used on fail-safe paths
pub fn fail_safe_score() -> TrustScore {
    TrustScore::new(crate::signals::NEUTRAL_SCORE, 0)
}

/// Recompute a record's score and decision under `config`
pub fn replay(record: &AuditRecord, config: &EngineConfig) -> Result<ReplayReport> {
    let (replayed_score, replayed) = match (&record.fail_safe, &record.decision) {
        (Some(code), AuditedDecision::Verification(_)) => (
            fail_safe_score(),
            AuditedDecision::Verification(VerificationDecision::fail_safe(code)),
        ),
        (Some(code), AuditedDecision::Refund(stored)) => (
            fail_safe_score(),
            AuditedDecision::Refund(refund::fail_safe(
                code,
                stored.evidence.elapsed_secs,
                &stored.evidence.claim(),
            )),
        ),
        (None, AuditedDecision::Verification(_)) => {
            let breakdown =
                TrustScoreCalculator::new(config).calculate(&record.signals, &record.cross_reference);
            let decision = decide(&record.signals, &record.cross_reference, &breakdown, config);
            (breakdown.trust_score, AuditedDecision::Verification(decision))
        }
        (None, AuditedDecision::Refund(stored)) => {
            let breakdown =
                TrustScoreCalculator::new(config).calculate(&record.signals, &record.cross_reference);
            let evidence = refund_evidence(
                &record.signals,
                breakdown.trust_score,
                stored.evidence.elapsed_secs,
                &stored.evidence.claim(),
            );
            (
                breakdown.trust_score,
                AuditedDecision::Refund(refund::evaluate(evidence, &config.refund)),
            )
        }
    };

    Ok(ReplayReport {
        verification_id: record.verification_id,
        replayed_score,
        score_matches: replayed_score == record.trust_score,
        decision_matches: replayed == record.decision,
        digest_matches: record.verify_digest()?,
    })
}

/// Whether the purchased content was opened.
///
/// The platform's record and the fan's claim are combined so that either
/// one reporting access counts. A fan's denial is not enough on its own:
/// without platform data the answer is unknown.
pub fn content_access(signals: &RiskSignals, claimed: Option<bool>) -> Option<bool> {
    let platform = if signals.is_available(SignalKind::Platform) {
        Some(signals.platform.content_accessed)
    } else {
        None
    };
    match (platform, claimed) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), _) => Some(false),
        (None, _) => None,
    }
}

/// Facts the refund policy sees, drawn from signals plus request inputs
pub fn refund_evidence(
    signals: &RiskSignals,
    trust_score: TrustScore,
    elapsed_secs: i64,
    claim: &RefundEvidence,
) -> RefundEvidenceSnapshot {
    let behavioral = if signals.is_available(SignalKind::Behavioral) {
        Some(&signals.behavioral)
    } else {
        None
    };
    RefundEvidenceSnapshot {
        elapsed_secs,
        content_accessed: content_access(signals, claim.content_accessed),
        claimed_content_accessed: claim.content_accessed,
        access_duration_secs: claim.access_duration_secs,
        trust_score: trust_score.score,
        refund_rate_pct: behavioral.and_then(|b| b.refund_rate_pct),
        refunds_last_24h: behavioral.and_then(|b| b.refunds_last_24h),
    }
}

/// One JSON object per line
pub fn to_json_lines(records: &[AuditRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a JSON-lines export; blank lines are skipped
pub fn from_json_lines(input: &str) -> Result<Vec<AuditRecord>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::InvalidRequest(format!("audit export line {}: {}", n + 1, e))
            })
        })
        .collect()
}
