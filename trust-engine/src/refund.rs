//! Refund policy
//!
//! A refund request is `pending` until the policy lands it in exactly one
//! terminal state. Rejection conditions are checked first, so a fan that
//! trips any of them is never approved or queued.

use crate::config::RefundPolicyConfig;
use crate::types::{
    RefundDecision, RefundEvidence, RefundEvidenceSnapshot, RefundOutcome, RefundState,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Refund waiting for a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewTicket {
    /// Refund under review
    pub refund_id: Uuid,

    /// Original transaction
    pub transaction_id: Uuid,

    /// Requesting fan
    pub fan_id: String,

    /// Why the policy could not decide
    pub reason: String,

    /// When the ticket was queued
    pub enqueued_at: DateTime<Utc>,

    /// SLA deadline
    pub deadline: DateTime<Utc>,
}

impl ReviewTicket {
    /// Whether the SLA has been breached at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// Decided refund, as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEntry {
    /// Refund ID
    pub refund_id: Uuid,

    /// Original transaction
    pub transaction_id: Uuid,

    /// Amount requested
    pub amount: Decimal,

    /// Terminal state reached
    pub state: RefundState,

    /// Audit record of the decision
    pub audit_id: Uuid,

    /// Decision time
    pub decided_at: DateTime<Utc>,
}

impl RefundEntry {
    /// Approved or still under review; counts against the refundable amount
    pub fn holds_funds(&self) -> bool {
        matches!(self.state, RefundState::AutoApproved | RefundState::ManualReview)
    }
}

/// Amount still refundable on a transaction of `amount`
pub fn refundable(amount: Decimal, entries: &[RefundEntry]) -> Decimal {
    let held: Decimal = entries
        .iter()
        .filter(|e| e.holds_funds())
        .map(|e| e.amount)
        .sum();
    (amount - held).max(Decimal::ZERO)
}

/// SLA deadline for a refund queued at `enqueued_at`
pub fn review_deadline(enqueued_at: DateTime<Utc>, policy: &RefundPolicyConfig) -> DateTime<Utc> {
    enqueued_at + Duration::seconds(policy.review_sla_secs)
}

/// Apply the refund policy to a snapshot of facts
pub fn evaluate(evidence: RefundEvidenceSnapshot, policy: &RefundPolicyConfig) -> RefundDecision {
    let (outcome, reason) = classify(&evidence, policy);
    RefundDecision {
        outcome,
        reason: reason.to_string(),
        evidence,
    }
}

fn classify(e: &RefundEvidenceSnapshot, policy: &RefundPolicyConfig) -> (RefundOutcome, &'static str) {
    // Any one of these rejects
    if e.trust_score < policy.reject_score {
        return (RefundOutcome::AutoReject, "trust_score_below_reject_threshold");
    }
    if e.refund_rate_pct.map_or(false, |r| r > policy.reject_refund_rate_pct) {
        return (RefundOutcome::AutoReject, "refund_rate_above_limit");
    }
    if e.refunds_last_24h.map_or(false, |n| n > policy.daily_refund_cap) {
        return (RefundOutcome::AutoReject, "refund_velocity_exceeded");
    }

    // All of these are needed to approve; the first miss names the review reason
    if e.elapsed_secs > policy.instant_window_secs {
        return (RefundOutcome::ManualReview, "outside_instant_window");
    }
    match e.content_accessed {
        Some(true) => return (RefundOutcome::ManualReview, "content_accessed"),
        None => return (RefundOutcome::ManualReview, "content_access_unknown"),
        Some(false) => {}
    }
    if e.access_duration_secs.map_or(false, |d| d > policy.access_grace_secs) {
        return (RefundOutcome::ManualReview, "content_accessed");
    }
    if e.trust_score < policy.auto_approve_score {
        return (RefundOutcome::ManualReview, "trust_score_below_auto_approve");
    }
    match e.refund_rate_pct {
        None => (RefundOutcome::ManualReview, "refund_history_unknown"),
        Some(rate) if rate >= policy.approve_max_refund_rate_pct => {
            (RefundOutcome::ManualReview, "refund_history_elevated")
        }
        Some(_) => (RefundOutcome::AutoApprove, "instant_refund_eligible"),
    }
}

/// `manual_review` decision used when evaluation could not finish
pub fn fail_safe(code: &str, elapsed_secs: i64, claim: &RefundEvidence) -> RefundDecision {
    RefundDecision {
        outcome: RefundOutcome::ManualReview,
        reason: code.to_string(),
        evidence: RefundEvidenceSnapshot {
            elapsed_secs,
            // Only a claimed access is trusted without the platform's record
            content_accessed: claim.content_accessed.filter(|accessed| *accessed),
            claimed_content_accessed: claim.content_accessed,
            access_duration_secs: claim.access_duration_secs,
            trust_score: crate::signals::NEUTRAL_SCORE,
            refund_rate_pct: None,
            refunds_last_24h: None,
        },
    }
}
