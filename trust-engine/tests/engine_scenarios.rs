//! End-to-end engine scenarios
//!
//! Each test drives a full engine built from fixed collectors and in-memory
//! stores, so outcomes are deterministic.

mod common;

use chrono::Duration as ChronoDuration;
use common::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use trust_engine::routing::DEFAULT_ROUTING_REASON;
use trust_engine::signals::{NetworkSignals, PlatformSignals, SignalKind};
use trust_engine::store::{AuditStore, RefundStore, ReviewQueue, TransactionStore};
use trust_engine::{
    replay, AuditedDecision, EngineConfig, Error, ProcessorRegistry, RefundEvidence, RefundOutcome,
    RefundRequest, RefundState, Transaction, TransactionStatus, VerificationStatus,
};
use uuid::Uuid;

#[tokio::test]
async fn test_reference_fan_is_verified() {
    let h = harness();
    let response = h
        .engine
        .verify_transaction(verification_request())
        .await
        .unwrap();

    assert_eq!(response.trust_score.score, 86);
    assert_eq!(response.trust_score.confidence, 99);
    assert_eq!(response.decision.status, VerificationStatus::Verified);
    assert!(response.cross_reference.found);
    assert_eq!(response.cross_reference.processor.as_deref(), Some("stripe"));
    assert!(!response.metadata.fail_safe);
    assert_eq!(response.metadata.adapters_queried, 1);

    // Audited before returning, and replayable
    let record = h
        .audit
        .audit_record(response.verification_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.trust_score, response.trust_score);
    assert!(replay(&record, &EngineConfig::default()).unwrap().is_clean());
}

#[tokio::test]
async fn test_anonymizer_is_rejected_whatever_the_score() {
    let mut collectors = reference_collectors();
    collectors.network = fixed(
        SignalKind::Network,
        Behaviour::Value(NetworkSignals {
            is_anonymizer: true,
            ..reference_network()
        }),
    );
    let h = harness_with(EngineConfig::default(), collectors);

    let response = h
        .engine
        .verify_transaction(verification_request())
        .await
        .unwrap();
    assert_eq!(response.decision.status, VerificationStatus::Rejected);
    assert!(response
        .decision
        .risk_factors
        .contains(&"tor_vpn_detected".to_string()));
}

#[tokio::test]
async fn test_two_degraded_collectors_fall_back_to_neutral() {
    let mut collectors = reference_collectors();
    collectors.device = fixed(SignalKind::Device, Behaviour::Degraded);
    collectors.network = fixed(SignalKind::Network, Behaviour::Degraded);
    let h = harness_with(EngineConfig::default(), collectors);

    let response = h
        .engine
        .verify_transaction(verification_request())
        .await
        .unwrap();

    // 0.25*50 + 0.20*50 + 0.15*80 + 0.30*80 + 0.10*100 = 68.5
    assert_eq!(response.trust_score.score, 69);
    assert_eq!(response.trust_score.confidence, 90);
    assert_eq!(response.decision.status, VerificationStatus::Suspicious);
    assert_eq!(response.metadata.degraded_signals, vec!["device", "network"]);
    assert!(response
        .decision
        .risk_factors
        .contains(&"device_data_unavailable".to_string()));
    assert!(!response.metadata.fail_safe);
}

#[tokio::test]
async fn test_overall_timeout_is_fail_safe() {
    let mut config = EngineConfig::default();
    config.timeouts.overall_ms = 50;
    config.timeouts.collector_ms = 10_000;
    let mut collectors = reference_collectors();
    collectors.behavioral = fixed(SignalKind::Behavioral, Behaviour::Hang);
    let h = harness_with(config, collectors);

    let response = h
        .engine
        .verify_transaction(verification_request())
        .await
        .unwrap();

    assert_eq!(response.decision.status, VerificationStatus::Suspicious);
    assert_eq!(response.decision.risk_factors, vec!["verification_timeout"]);
    assert_eq!(response.decision.next_actions, vec!["manual_review"]);
    assert_eq!(response.trust_score.confidence, 0);
    assert!(response.metadata.fail_safe);

    let record = h
        .audit
        .audit_record(response.verification_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.fail_safe.as_deref(), Some("verification_timeout"));
}

#[tokio::test]
async fn test_infrastructure_failure_is_fail_safe() {
    let mut collectors = reference_collectors();
    collectors.payment = fixed(SignalKind::Payment, Behaviour::Offline);
    let h = harness_with(EngineConfig::default(), collectors);

    let response = h
        .engine
        .verify_transaction(verification_request())
        .await
        .unwrap();
    assert_eq!(response.decision.status, VerificationStatus::Suspicious);
    assert_eq!(response.decision.risk_factors, vec!["infrastructure_unavailable"]);
    assert_eq!(h.audit.len(), 1);
}

#[tokio::test]
async fn test_invalid_request_is_an_error_not_a_decision() {
    let h = harness();
    let mut request = verification_request();
    request.proof.email = "not-an-email".to_string();

    let err = h.engine.verify_transaction(request).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn test_no_processor_adapters_still_decides() {
    let h = harness_full(
        EngineConfig::default(),
        reference_collectors(),
        ProcessorRegistry::new(),
        None,
    );
    let response = h
        .engine
        .verify_transaction(verification_request())
        .await
        .unwrap();

    // Cross-reference only feeds confidence: 50 + 10 + 10 + 10
    assert_eq!(response.trust_score.score, 86);
    assert_eq!(response.trust_score.confidence, 80);
    assert_eq!(response.decision.status, VerificationStatus::Verified);
    assert!(response
        .decision
        .risk_factors
        .contains(&"no_processor_match".to_string()));
}

#[tokio::test]
async fn test_verified_payment_is_routed_and_settles() {
    let h = harness();
    let outcome = h.engine.process_payment(payment_request()).await.unwrap();

    let tx = &outcome.transaction;
    assert_eq!(tx.status, TransactionStatus::Processing);
    assert_eq!(tx.currency, "USD");
    assert_eq!(tx.risk_score, Some(86));
    assert_eq!(tx.verification_id, Some(outcome.verification.verification_id));

    // No routing rules loaded
    let route = outcome.route.unwrap();
    assert_eq!(route.processor, "stripe");
    assert_eq!(route.reason, DEFAULT_ROUTING_REASON);
    assert_eq!(tx.processor.as_deref(), Some("stripe"));

    let settlement = outcome.settlement.unwrap();
    assert_eq!(settlement.fees.amount, dec!(9.99));
    assert_eq!(
        settlement.fees.net_amount,
        dec!(9.99) - settlement.fees.total_fees
    );

    // Verification audited against this transaction
    let record = h
        .audit
        .audit_record(outcome.verification.verification_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.transaction_id, Some(tx.id));

    let completed = h.engine.complete_transaction(tx.id, true).await.unwrap();
    assert_eq!(completed.status, TransactionStatus::Completed);
    assert!(matches!(
        h.engine.complete_transaction(tx.id, false).await,
        Err(Error::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_suspicious_payment_waits_for_review() {
    let mut collectors = reference_collectors();
    collectors.device = fixed(SignalKind::Device, Behaviour::Degraded);
    collectors.network = fixed(SignalKind::Network, Behaviour::Degraded);
    let h = harness_with(EngineConfig::default(), collectors);

    let outcome = h.engine.process_payment(payment_request()).await.unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::RequiresVerification);
    assert!(outcome.route.is_none());

    let released = h
        .engine
        .release_reviewed_transaction(outcome.transaction.id, true)
        .await
        .unwrap();
    assert_eq!(released.transaction.status, TransactionStatus::Processing);
    assert!(released.route.is_some());
    assert_eq!(
        released.verification.verification_id,
        outcome.verification.verification_id
    );

    // Only parked transactions can be released
    assert!(h
        .engine
        .release_reviewed_transaction(outcome.transaction.id, true)
        .await
        .is_err());
}

#[tokio::test]
async fn test_rejected_payment_fails() {
    let mut collectors = reference_collectors();
    collectors.network = fixed(
        SignalKind::Network,
        Behaviour::Value(NetworkSignals {
            known_malicious: true,
            ..reference_network()
        }),
    );
    let h = harness_with(EngineConfig::default(), collectors);

    let outcome = h.engine.process_payment(payment_request()).await.unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::Failed);
    assert!(outcome.route.is_none());

    let stored = h
        .transactions
        .get_transaction(outcome.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_unsupported_currency_creates_nothing() {
    let h = harness();
    let mut request = payment_request();
    request.currency = "XYZ".to_string();

    let err = h.engine.process_payment(request).await.unwrap_err();
    assert!(matches!(err, Error::PolicyMisconfiguration(_)));
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn test_audit_outage_holds_the_payment() {
    let h = harness_full(
        EngineConfig::default(),
        reference_collectors(),
        stripe_registry(),
        Some(Arc::new(BrokenAuditStore)),
    );

    let outcome = h.engine.process_payment(payment_request()).await.unwrap();
    assert_eq!(outcome.verification.decision.status, VerificationStatus::Suspicious);
    assert_eq!(
        outcome.verification.decision.risk_factors,
        vec!["audit_unavailable"]
    );
    assert_eq!(outcome.transaction.status, TransactionStatus::RequiresVerification);
}

async fn completed_payment(h: &Harness) -> Transaction {
    let outcome = h.engine.process_payment(payment_request()).await.unwrap();
    h.engine
        .complete_transaction(outcome.transaction.id, true)
        .await
        .unwrap()
}

fn refund_request(tx: &Transaction, after: ChronoDuration) -> RefundRequest {
    RefundRequest {
        refund_id: Uuid::now_v7(),
        transaction_id: tx.id,
        amount: tx.amount,
        reason: "changed my mind".to_string(),
        requested_at: tx.created_at + after,
        evidence: RefundEvidence::default(),
        device_fingerprint: Some("fp-abc".to_string()),
        ip_address: Some("203.0.113.9".to_string()),
    }
}

#[tokio::test]
async fn test_quick_refund_is_auto_approved() {
    let h = harness();
    let tx = completed_payment(&h).await;

    let response = h
        .engine
        .process_refund(refund_request(&tx, ChronoDuration::minutes(30)))
        .await
        .unwrap();

    assert_eq!(response.decision.outcome, RefundOutcome::AutoApprove);
    assert_eq!(response.decision.reason, "instant_refund_eligible");
    assert_eq!(response.state, RefundState::AutoApproved);
    assert_eq!(response.decision.evidence.elapsed_secs, 30 * 60);
    assert!(response.review_deadline.is_none());
    assert!(h.review_queue.pending().await.unwrap().is_empty());

    let refund_record = h
        .audit
        .records()
        .into_iter()
        .find(|r| r.refund_id == Some(response.refund_id))
        .unwrap();
    assert!(matches!(refund_record.decision, AuditedDecision::Refund(_)));
    assert!(replay(&refund_record, &EngineConfig::default()).unwrap().is_clean());
}

#[tokio::test]
async fn test_late_refund_goes_to_review_with_deadline() {
    let h = harness();
    let tx = completed_payment(&h).await;

    let response = h
        .engine
        .process_refund(refund_request(&tx, ChronoDuration::days(10)))
        .await
        .unwrap();

    assert_eq!(response.decision.outcome, RefundOutcome::ManualReview);
    assert_eq!(response.decision.reason, "outside_instant_window");

    let queued = h.review_queue.pending().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].refund_id, response.refund_id);
    assert_eq!(
        queued[0].deadline - queued[0].enqueued_at,
        ChronoDuration::hours(4)
    );
    assert_eq!(response.review_deadline, Some(queued[0].deadline));
}

#[tokio::test]
async fn test_accessed_content_needs_review() {
    let h = harness();
    let tx = completed_payment(&h).await;

    let mut request = refund_request(&tx, ChronoDuration::minutes(5));
    request.evidence.content_accessed = Some(true);
    let response = h.engine.process_refund(request).await.unwrap();

    assert_eq!(response.decision.outcome, RefundOutcome::ManualReview);
    assert_eq!(response.decision.reason, "content_accessed");
}

#[tokio::test]
async fn test_refund_preconditions() {
    let h = harness();

    // Unknown transaction
    let ghost = Transaction {
        id: Uuid::now_v7(),
        ..completed_payment(&h).await
    };
    assert!(matches!(
        h.engine
            .process_refund(refund_request(&ghost, ChronoDuration::minutes(1)))
            .await,
        Err(Error::TransactionNotFound(_))
    ));

    // Not yet completed
    let processing = h.engine.process_payment(payment_request()).await.unwrap();
    assert!(h
        .engine
        .process_refund(refund_request(&processing.transaction, ChronoDuration::minutes(1)))
        .await
        .is_err());

    // More than was paid
    let tx = completed_payment(&h).await;
    let mut too_much = refund_request(&tx, ChronoDuration::minutes(1));
    too_much.amount = dec!(100);
    assert!(h.engine.process_refund(too_much).await.is_err());

    // Before the purchase
    let early = refund_request(&tx, ChronoDuration::minutes(-1));
    assert!(h.engine.process_refund(early).await.is_err());
}

#[tokio::test]
async fn test_refund_under_infrastructure_outage_is_reviewed() {
    let h = harness();
    let tx = completed_payment(&h).await;

    // Same stores, collectors now offline
    let mut collectors = reference_collectors();
    collectors.behavioral = fixed(SignalKind::Behavioral, Behaviour::Offline);
    let offline = harness_with(EngineConfig::default(), collectors);
    offline.transactions.store_transaction(&tx).await.unwrap();

    let response = offline
        .engine
        .process_refund(refund_request(&tx, ChronoDuration::minutes(10)))
        .await
        .unwrap();
    assert_eq!(response.decision.outcome, RefundOutcome::ManualReview);
    assert_eq!(response.decision.reason, "infrastructure_unavailable");
    assert!(response.metadata.fail_safe);
    assert_eq!(offline.review_queue.pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_platform_record_of_access_outranks_fan_denial() {
    let mut collectors = reference_collectors();
    collectors.platform = fixed(
        SignalKind::Platform,
        Behaviour::Value(PlatformSignals {
            content_accessed: true,
            ..reference_platform()
        }),
    );
    let h = harness_with(EngineConfig::default(), collectors);
    let tx = completed_payment(&h).await;

    let mut request = refund_request(&tx, ChronoDuration::minutes(10));
    request.evidence.content_accessed = Some(false);
    let response = h.engine.process_refund(request).await.unwrap();

    assert_eq!(response.decision.outcome, RefundOutcome::ManualReview);
    assert_eq!(response.decision.reason, "content_accessed");
    assert_eq!(response.decision.evidence.content_accessed, Some(true));
    assert_eq!(response.decision.evidence.claimed_content_accessed, Some(false));
}

#[tokio::test]
async fn test_unknown_content_access_is_reviewed() {
    let mut collectors = reference_collectors();
    collectors.platform = fixed(SignalKind::Platform, Behaviour::Degraded);
    let h = harness_with(EngineConfig::default(), collectors);
    let tx = completed_payment(&h).await;

    let response = h
        .engine
        .process_refund(refund_request(&tx, ChronoDuration::minutes(10)))
        .await
        .unwrap();

    assert_eq!(response.trust_score.score, 81);
    assert_eq!(response.metadata.degraded_signals, vec!["platform"]);
    assert_eq!(response.decision.outcome, RefundOutcome::ManualReview);
    assert_eq!(response.decision.reason, "content_access_unknown");
    assert_eq!(response.decision.evidence.content_accessed, None);

    let record = h
        .audit
        .records()
        .into_iter()
        .find(|r| r.refund_id == Some(response.refund_id))
        .unwrap();
    assert!(replay(&record, &EngineConfig::default()).unwrap().is_clean());
}

#[tokio::test]
async fn test_reported_viewing_time_blocks_instant_refund() {
    let h = harness();
    let tx = completed_payment(&h).await;

    let mut request = refund_request(&tx, ChronoDuration::minutes(10));
    request.evidence.access_duration_secs = Some(90);
    let response = h.engine.process_refund(request).await.unwrap();

    assert_eq!(response.decision.outcome, RefundOutcome::ManualReview);
    assert_eq!(response.decision.reason, "content_accessed");
    assert_eq!(response.decision.evidence.access_duration_secs, Some(90));
}

#[tokio::test]
async fn test_refund_is_decided_once() {
    let h = harness();
    let tx = completed_payment(&h).await;

    let mut first = refund_request(&tx, ChronoDuration::minutes(10));
    first.amount = dec!(5.00);
    let response = h.engine.process_refund(first.clone()).await.unwrap();
    assert_eq!(response.state, RefundState::AutoApproved);

    // Same refund again
    let err = h.engine.process_refund(first.clone()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    let stored = h.refunds.get_refund(first.refund_id).await.unwrap().unwrap();
    assert_eq!(stored.state, RefundState::AutoApproved);

    // Full amount on top of the approved part
    let err = h
        .engine
        .process_refund(refund_request(&tx, ChronoDuration::minutes(11)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    // The remainder is still refundable, then nothing is
    let mut rest = refund_request(&tx, ChronoDuration::minutes(12));
    rest.amount = dec!(4.99);
    assert_eq!(
        h.engine.process_refund(rest).await.unwrap().state,
        RefundState::AutoApproved
    );
    let mut extra = refund_request(&tx, ChronoDuration::minutes(13));
    extra.amount = dec!(0.01);
    assert!(h.engine.process_refund(extra).await.is_err());
    assert_eq!(h.refunds.refunds_for(tx.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_queued_refund_holds_the_amount() {
    let h = harness();
    let tx = completed_payment(&h).await;

    let queued = h
        .engine
        .process_refund(refund_request(&tx, ChronoDuration::days(10)))
        .await
        .unwrap();
    assert_eq!(queued.state, RefundState::ManualReview);

    let mut more = refund_request(&tx, ChronoDuration::days(10));
    more.amount = dec!(1.00);
    assert!(matches!(
        h.engine.process_refund(more).await,
        Err(Error::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_concurrent_refunds_cannot_overdraw() {
    let h = harness();
    let tx = completed_payment(&h).await;

    let a = refund_request(&tx, ChronoDuration::minutes(10));
    let b = refund_request(&tx, ChronoDuration::minutes(10));
    let (first, second) = tokio::join!(h.engine.process_refund(a), h.engine.process_refund(b));

    assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(h.refunds.refunds_for(tx.id).await.unwrap().len(), 1);
    assert_eq!(h.engine.active_locks(), 0);
}

#[tokio::test]
async fn test_unknown_transaction_leaves_no_lock() {
    let h = harness();

    assert!(matches!(
        h.engine.complete_transaction(Uuid::now_v7(), true).await,
        Err(Error::TransactionNotFound(_))
    ));
    assert!(matches!(
        h.engine.release_reviewed_transaction(Uuid::now_v7(), true).await,
        Err(Error::TransactionNotFound(_))
    ));
    assert_eq!(h.engine.active_locks(), 0);

    let tx = completed_payment(&h).await;
    h.engine
        .process_refund(refund_request(&tx, ChronoDuration::minutes(5)))
        .await
        .unwrap();
    assert_eq!(h.engine.active_locks(), 0);
}
