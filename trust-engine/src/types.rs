//! Core types for the trust engine

use crate::signals::RiskSignals;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Highest confidence the calculator will ever report
pub const MAX_CONFIDENCE: u8 = 99;

/// Payment method kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    /// Credit/debit card
    Card,
    /// Cryptocurrency transfer
    Crypto,
    /// Bank transfer / payout rail
    BankTransfer,
    /// Stored-value wallet
    Wallet,
}

impl PaymentMethodKind {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::Card => "card",
            PaymentMethodKind::Crypto => "crypto",
            PaymentMethodKind::BankTransfer => "bank_transfer",
            PaymentMethodKind::Wallet => "wallet",
        }
    }
}

impl fmt::Display for PaymentMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence the fan supplies about a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionProof {
    /// Billing email
    pub email: String,

    /// When the payment was claimed to happen
    pub timestamp: DateTime<Utc>,

    /// Processor-side reference (charge id, tx hash, bank reference)
    #[serde(default)]
    pub transaction_ref: Option<String>,

    /// Last four card digits
    #[serde(default)]
    pub card_last4: Option<String>,

    /// Device fingerprint
    #[serde(default)]
    pub device_fingerprint: Option<String>,

    /// Client IP address
    #[serde(default)]
    pub ip_address: Option<String>,

    /// Claimed amount
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Verification request, immutable once received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Paying fan
    pub fan_id: String,

    /// Receiving creator
    pub creator_id: String,

    /// Transaction being verified, if already created
    #[serde(default)]
    pub transaction_id: Option<Uuid>,

    /// Payment method
    pub payment_method: PaymentMethodKind,

    /// Client platform (web, ios, android, ...)
    pub platform: String,

    /// Proof bundle
    pub proof: TransactionProof,
}

impl VerificationRequest {
    /// Reject structurally broken requests before any collector runs
    pub fn validate(&self) -> Result<()> {
        if self.fan_id.trim().is_empty() {
            return Err(Error::InvalidRequest("fan_id is empty".to_string()));
        }
        if self.creator_id.trim().is_empty() {
            return Err(Error::InvalidRequest("creator_id is empty".to_string()));
        }
        if !self.proof.email.contains('@') {
            return Err(Error::InvalidRequest(format!(
                "malformed email: {}",
                self.proof.email
            )));
        }
        if let Some(last4) = &self.proof.card_last4 {
            if last4.len() != 4 || !last4.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::InvalidRequest(format!(
                    "card_last4 must be four digits, got {:?}",
                    last4
                )));
            }
        }
        if let Some(amount) = self.proof.amount {
            if amount <= Decimal::ZERO {
                return Err(Error::InvalidRequest(format!(
                    "amount must be positive, got {}",
                    amount
                )));
            }
        }
        Ok(())
    }

    /// Signal subject for re-scoring the fan behind a refund
    pub fn for_refund(transaction: &Transaction, refund: &RefundRequest) -> Self {
        Self {
            fan_id: transaction.fan_id.clone(),
            creator_id: transaction.creator_id.clone(),
            transaction_id: Some(transaction.id),
            payment_method: transaction.payment_method,
            platform: transaction.platform.clone(),
            proof: TransactionProof {
                email: String::new(),
                timestamp: refund.requested_at,
                transaction_ref: None,
                card_last4: None,
                device_fingerprint: refund.device_fingerprint.clone(),
                ip_address: refund.ip_address.clone(),
                amount: Some(refund.amount),
            },
        }
    }
}

/// Trust score with the confidence backing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustScore {
    /// 0-100, higher is more trustworthy
    pub score: u8,

    /// 0-99, how much evidence backed the score
    pub confidence: u8,
}

impl TrustScore {
    /// Create new trust score, clamping both fields into range
    pub fn new(score: u8, confidence: u8) -> Self {
        Self {
            score: score.min(100),
            confidence: confidence.min(MAX_CONFIDENCE),
        }
    }
}

/// Result of corroborating a proof against processor records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CrossReferenceResult {
    /// Whether any processor corroborated the payment
    pub found: bool,

    /// Processor holding the best match
    pub processor: Option<String>,

    /// Confidence of the best match (0 when nothing matched)
    pub confidence: u8,

    /// Processor-side reference of the best match
    pub processor_reference: Option<String>,

    /// Adapters that timed out or failed
    #[serde(default)]
    pub unavailable: Vec<String>,
}

impl CrossReferenceResult {
    /// Nothing corroborated
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Verification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Allowed
    Verified,
    /// Needs manual review
    Suspicious,
    /// Blocked
    Rejected,
}

impl VerificationStatus {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Suspicious => "suspicious",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

/// Human-readable breakdown of a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DecisionExplanation {
    /// Sub-scores ordered by weighted contribution
    pub primary_factors: Vec<String>,

    /// Human-readable risks
    pub risk_factors: Vec<String>,

    /// Evidence in the transaction's favour
    pub protective_factors: Vec<String>,

    /// What an operator or the fan should do next
    pub recommendations: Vec<String>,
}

/// Verification decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationDecision {
    /// Outcome
    pub status: VerificationStatus,

    /// Machine-readable risk codes
    pub risk_factors: Vec<String>,

    /// Machine-readable follow-up actions
    pub next_actions: Vec<String>,

    /// Explanation for humans
    pub explanation: DecisionExplanation,
}

/// Observability metadata attached to a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseMetadata {
    /// Wall-clock time spent evaluating
    pub processing_time_ms: u64,

    /// Collectors that fell back to neutral defaults
    pub degraded_signals: Vec<String>,

    /// Number of processor adapters consulted
    pub adapters_queried: usize,

    /// Set when the request ended on the fail-safe path
    pub fail_safe: bool,
}

/// Verification response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResponse {
    /// Audit key
    pub verification_id: Uuid,

    /// Transaction verified, if any
    pub transaction_id: Option<Uuid>,

    /// Trust score
    pub trust_score: TrustScore,

    /// Decision
    pub decision: VerificationDecision,

    /// Cross-reference outcome
    pub cross_reference: CrossReferenceResult,

    /// Signals the decision was computed from
    pub signals: RiskSignals,

    /// Observability metadata
    pub metadata: ResponseMetadata,
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, not yet verified
    Pending,
    /// Verified and handed to a processor
    Processing,
    /// Settled
    Completed,
    /// Rejected or failed at the processor
    Failed,
    /// Parked for manual verification
    RequiresVerification,
}

impl TransactionStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Lifecycle transition table
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, RequiresVerification)
                | (RequiresVerification, Processing)
                | (RequiresVerification, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RequiresVerification => "requires_verification",
        }
    }
}

/// Payment transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: Uuid,

    /// Paying fan
    pub fan_id: String,

    /// Receiving creator
    pub creator_id: String,

    /// Amount
    pub amount: Decimal,

    /// ISO 4217 currency
    pub currency: String,

    /// Payment method
    pub payment_method: PaymentMethodKind,

    /// Client platform
    pub platform: String,

    /// Assigned processor
    pub processor: Option<String>,

    /// Assigned merchant account
    pub merchant_id: Option<String>,

    /// Lifecycle status
    pub status: TransactionStatus,

    /// Trust score attached at verification
    pub risk_score: Option<u8>,

    /// Audit key of the verification
    pub verification_id: Option<Uuid>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Move to `next`, enforcing the lifecycle table
    pub fn transition(&mut self, next: TransactionStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}

/// Inbound payment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Paying fan
    pub fan_id: String,

    /// Receiving creator
    pub creator_id: String,

    /// Amount
    pub amount: Decimal,

    /// ISO 4217 currency
    pub currency: String,

    /// Payment method
    pub payment_method: PaymentMethodKind,

    /// Client platform
    pub platform: String,

    /// Proof bundle
    pub proof: TransactionProof,
}

/// Evidence attached to a refund request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RefundEvidence {
    /// Whether the fan already opened the purchased content
    #[serde(default)]
    pub content_accessed: Option<bool>,

    /// How long the content was accessed, in seconds
    #[serde(default)]
    pub access_duration_secs: Option<u64>,
}

/// Refund request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Refund ID
    pub refund_id: Uuid,

    /// Original transaction
    pub transaction_id: Uuid,

    /// Amount to refund
    pub amount: Decimal,

    /// Free-text reason given by the fan
    pub reason: String,

    /// When the refund was requested
    pub requested_at: DateTime<Utc>,

    /// Optional evidence
    #[serde(default)]
    pub evidence: RefundEvidence,

    /// Device fingerprint at request time
    #[serde(default)]
    pub device_fingerprint: Option<String>,

    /// IP at request time
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Refund lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundState {
    /// Not yet decided
    Pending,
    /// Approved without a human
    AutoApproved,
    /// Waiting in the review queue
    ManualReview,
    /// Rejected without a human
    AutoRejected,
}

impl RefundState {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundState::Pending => "pending",
            RefundState::AutoApproved => "auto_approved",
            RefundState::ManualReview => "manual_review",
            RefundState::AutoRejected => "auto_rejected",
        }
    }

    /// Only `Pending` can move, and only to a terminal outcome
    pub fn can_transition_to(&self, next: RefundState) -> bool {
        matches!(self, RefundState::Pending) && !matches!(next, RefundState::Pending)
    }
}

/// Refund policy outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundOutcome {
    /// Refund issued immediately
    AutoApprove,
    /// Queued for a human
    ManualReview,
    /// Declined
    AutoReject,
}

impl RefundOutcome {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundOutcome::AutoApprove => "auto_approve",
            RefundOutcome::ManualReview => "manual_review",
            RefundOutcome::AutoReject => "auto_reject",
        }
    }

    /// Terminal refund state this outcome lands in
    pub fn state(&self) -> RefundState {
        match self {
            RefundOutcome::AutoApprove => RefundState::AutoApproved,
            RefundOutcome::ManualReview => RefundState::ManualReview,
            RefundOutcome::AutoReject => RefundState::AutoRejected,
        }
    }
}

/// Facts the refund policy looked at, kept for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEvidenceSnapshot {
    /// Seconds between purchase and refund request
    pub elapsed_secs: i64,

    /// Whether content had been accessed; `None` when nothing trustworthy said
    pub content_accessed: Option<bool>,

    /// Access flag as claimed by the fan
    #[serde(default)]
    pub claimed_content_accessed: Option<bool>,

    /// Viewing time reported with the request
    #[serde(default)]
    pub access_duration_secs: Option<u64>,

    /// Trust score at decision time
    pub trust_score: u8,

    /// Historical refund rate, percent
    pub refund_rate_pct: Option<u8>,

    /// Refunds in the trailing 24 hours
    pub refunds_last_24h: Option<u32>,
}

impl RefundEvidenceSnapshot {
    /// Request evidence the snapshot was built from
    pub fn claim(&self) -> RefundEvidence {
        RefundEvidence {
            content_accessed: self.claimed_content_accessed,
            access_duration_secs: self.access_duration_secs,
        }
    }
}

/// Refund policy decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDecision {
    /// Outcome
    pub outcome: RefundOutcome,

    /// Machine-readable reason code
    pub reason: String,

    /// Snapshot the decision was computed from
    pub evidence: RefundEvidenceSnapshot,
}

/// Refund response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    /// Refund ID
    pub refund_id: Uuid,

    /// Original transaction
    pub transaction_id: Uuid,

    /// Terminal state reached
    pub state: RefundState,

    /// Decision
    pub decision: RefundDecision,

    /// Trust score used
    pub trust_score: TrustScore,

    /// Review deadline when queued
    pub review_deadline: Option<DateTime<Utc>>,

    /// Observability metadata
    pub metadata: ResponseMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> VerificationRequest {
        VerificationRequest {
            fan_id: "fan-1".to_string(),
            creator_id: "creator-1".to_string(),
            transaction_id: None,
            payment_method: PaymentMethodKind::Card,
            platform: "web".to_string(),
            proof: TransactionProof {
                email: "fan@example.com".to_string(),
                timestamp: Utc::now(),
                transaction_ref: None,
                card_last4: Some("4242".to_string()),
                device_fingerprint: None,
                ip_address: None,
                amount: None,
            },
        }
    }

    #[test]
    fn test_trust_score_clamps() {
        let score = TrustScore::new(250, 120);
        assert_eq!(score.score, 100);
        assert_eq!(score.confidence, MAX_CONFIDENCE);
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let mut bad = request();
        bad.proof.card_last4 = Some("42a2".to_string());
        assert!(matches!(bad.validate(), Err(Error::InvalidRequest(_))));

        let mut bad = request();
        bad.proof.email = "nobody".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_transaction_lifecycle() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(RequiresVerification.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_refund_state_is_terminal_after_decision() {
        assert!(RefundState::Pending.can_transition_to(RefundState::ManualReview));
        assert!(!RefundState::AutoApproved.can_transition_to(RefundState::AutoRejected));
        assert!(!RefundState::Pending.can_transition_to(RefundState::Pending));
        assert_eq!(RefundOutcome::AutoReject.state(), RefundState::AutoRejected);
    }
}
