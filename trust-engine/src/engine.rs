//! Trust engine
//!
//! Orchestrates one request end to end: signal collection and processor
//! cross-reference in parallel, scoring, decision, audit, then routing and
//! fees for payments or the refund policy for refunds.
//!
//! The engine holds no ambient state. Configuration is immutable after
//! construction and every collaborator is injected through [`EngineDeps`].

use crate::audit::{fail_safe_score, refund_evidence, AuditRecord, AuditedDecision};
use crate::config::EngineConfig;
use crate::cross_reference::ProcessorRegistry;
use crate::decision::{decide, AUDIT_UNAVAILABLE, INFRASTRUCTURE_UNAVAILABLE, VERIFICATION_TIMEOUT};
use crate::fees::{FeeCalculator, SettlementEstimate};
use crate::metrics::{
    REFUND_DECISIONS_TOTAL, ROUTING_DECISIONS_TOTAL, VERIFICATIONS_TOTAL, VERIFICATION_DURATION,
};
use crate::refund::{self, review_deadline, RefundEntry, ReviewTicket};
use crate::routing::{PaymentRouter, RouteContext, RouteDecision};
use crate::scoring::TrustScoreCalculator;
use crate::signals::{RiskSignals, SignalCollectors};
use crate::store::{AuditStore, RefundStore, ReviewQueue, TransactionStore};
use crate::types::{
    CrossReferenceResult, PaymentRequest, RefundDecision, RefundOutcome, RefundRequest,
    RefundResponse, RefundState, ResponseMetadata, Transaction, TransactionStatus, TrustScore,
    VerificationDecision, VerificationRequest, VerificationResponse, VerificationStatus,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Collaborators the engine is built from
pub struct EngineDeps {
    /// Signal collectors
    pub collectors: SignalCollectors,
    /// Processor adapters
    pub processors: ProcessorRegistry,
    /// Audit log
    pub audit: Arc<dyn AuditStore>,
    /// Transaction rows
    pub transactions: Arc<dyn TransactionStore>,
    /// Manual review queue
    pub review_queue: Arc<dyn ReviewQueue>,
    /// Decided refunds
    pub refunds: Arc<dyn RefundStore>,
    /// Router; shared so the caller can drive rule refreshes
    pub router: Arc<PaymentRouter>,
}

/// Outcome of [`TrustEngine::process_payment`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    /// Transaction as persisted
    pub transaction: Transaction,
    /// Verification behind the status
    pub verification: VerificationResponse,
    /// Routing, when the payment was released to a processor
    pub route: Option<RouteDecision>,
    /// Fees and settlement date, when routed
    pub settlement: Option<SettlementEstimate>,
}

/// Scored and decided, before audit
struct Evaluation {
    signals: RiskSignals,
    cross_reference: CrossReferenceResult,
    trust_score: TrustScore,
    decision: VerificationDecision,
    fail_safe: Option<&'static str>,
}

impl Evaluation {
    fn fail_safe(code: &'static str) -> Self {
        Self {
            signals: RiskSignals::default(),
            cross_reference: CrossReferenceResult::not_found(),
            trust_score: fail_safe_score(),
            decision: VerificationDecision::fail_safe(code),
            fail_safe: Some(code),
        }
    }
}

/// Trust & routing engine
pub struct TrustEngine {
    config: Arc<EngineConfig>,
    collectors: SignalCollectors,
    processors: Arc<ProcessorRegistry>,
    audit: Arc<dyn AuditStore>,
    transactions: Arc<dyn TransactionStore>,
    review_queue: Arc<dyn ReviewQueue>,
    refunds: Arc<dyn RefundStore>,
    router: Arc<PaymentRouter>,
    fees: FeeCalculator,
    // Map: transaction_id -> single-writer lock
    tx_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl TrustEngine {
    /// Create new engine; rejects invalid configuration
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self> {
        config.validate()?;
        if deps.processors.is_empty() {
            warn!("No processor adapters registered; cross-reference will never corroborate");
        }
        info!(
            "Trust engine {} started with {} processor adapters",
            config.service_name,
            deps.processors.len()
        );

        Ok(Self {
            fees: FeeCalculator::new(config.fees.clone()),
            config: Arc::new(config),
            collectors: deps.collectors,
            processors: Arc::new(deps.processors),
            audit: deps.audit,
            transactions: deps.transactions,
            review_queue: deps.review_queue,
            refunds: deps.refunds,
            router: deps.router,
            tx_locks: DashMap::new(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Router in use
    pub fn router(&self) -> &Arc<PaymentRouter> {
        &self.router
    }

    fn collector_budget(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.collector_ms)
    }

    fn adapter_budget(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.adapter_ms)
    }

    fn overall_budget(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.overall_ms)
    }

    /// Verify a payment claim.
    ///
    /// Returns a decision for everything except invalid requests and policy
    /// misconfiguration. Infrastructure failures and timeouts yield a
    /// `suspicious` fail-safe decision. The decision is appended to the
    /// audit log before this returns.
    pub async fn verify_transaction(&self, request: VerificationRequest) -> Result<VerificationResponse> {
        request.validate()?;
        let started = Instant::now();
        let verification_id = Uuid::now_v7();

        let evaluation = match tokio::time::timeout(self.overall_budget(), self.evaluate(&request)).await {
            Ok(Ok(evaluation)) => evaluation,
            Ok(Err(e)) if e.is_infrastructure() => {
                error!("Verification {} aborted: {}", verification_id, e);
                Evaluation::fail_safe(INFRASTRUCTURE_UNAVAILABLE)
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(
                    "Verification {} exceeded {}ms",
                    verification_id, self.config.timeouts.overall_ms
                );
                Evaluation::fail_safe(VERIFICATION_TIMEOUT)
            }
        };

        let evaluation = self.record_verification(verification_id, request.transaction_id, evaluation).await;

        let status = evaluation.decision.status;
        VERIFICATIONS_TOTAL.with_label_values(&[status.as_str()]).inc();
        VERIFICATION_DURATION.observe(started.elapsed().as_secs_f64());

        info!(
            "Verification {} for fan {}: {} (score {}, confidence {})",
            verification_id,
            request.fan_id,
            status.as_str(),
            evaluation.trust_score.score,
            evaluation.trust_score.confidence
        );

        Ok(VerificationResponse {
            verification_id,
            transaction_id: request.transaction_id,
            trust_score: evaluation.trust_score,
            metadata: ResponseMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                degraded_signals: evaluation
                    .signals
                    .unavailable
                    .iter()
                    .map(|k| k.as_str().to_string())
                    .collect(),
                adapters_queried: self.processors.supporting(request.payment_method),
                fail_safe: evaluation.fail_safe.is_some(),
            },
            decision: evaluation.decision,
            cross_reference: evaluation.cross_reference,
            signals: evaluation.signals,
        })
    }

    async fn evaluate(&self, request: &VerificationRequest) -> Result<Evaluation> {
        let (signals, cross_reference) = tokio::join!(
            self.collectors.collect_all(request, self.collector_budget()),
            self.processors
                .cross_reference(&request.proof, request.payment_method, self.adapter_budget()),
        );
        let signals = signals?;

        let breakdown = TrustScoreCalculator::new(&self.config).calculate(&signals, &cross_reference);
        let decision = decide(&signals, &cross_reference, &breakdown, &self.config);

        Ok(Evaluation {
            signals,
            cross_reference,
            trust_score: breakdown.trust_score,
            decision,
            fail_safe: None,
        })
    }

    /// Append the audit record; a failed write downgrades to fail-safe
    async fn record_verification(
        &self,
        verification_id: Uuid,
        transaction_id: Option<Uuid>,
        evaluation: Evaluation,
    ) -> Evaluation {
        let record = AuditRecord::new(
            verification_id,
            transaction_id,
            None,
            evaluation.signals.clone(),
            evaluation.cross_reference.clone(),
            evaluation.trust_score,
            AuditedDecision::Verification(evaluation.decision.clone()),
            evaluation.fail_safe.map(String::from),
        );

        let written = match record {
            Ok(record) => self.audit.store_audit_record(record).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => evaluation,
            Err(e) => {
                error!("Audit write for verification {} failed: {}", verification_id, e);
                Evaluation {
                    decision: VerificationDecision::fail_safe(AUDIT_UNAVAILABLE),
                    trust_score: fail_safe_score(),
                    fail_safe: Some(AUDIT_UNAVAILABLE),
                    ..evaluation
                }
            }
        }
    }

    fn lock_for(&self, transaction_id: Uuid) -> Arc<Mutex<()>> {
        self.tx_locks
            .entry(transaction_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `work` as the only writer of `transaction_id`
    async fn owned<T>(&self, transaction_id: Uuid, work: impl Future<Output = Result<T>>) -> Result<T> {
        let lock = self.lock_for(transaction_id);
        let outcome = {
            let _owner = lock.lock().await;
            work.await
        };
        // Idle once only the map and this call hold it
        self.tx_locks.remove_if(&transaction_id, |_, held| {
            Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2
        });
        outcome
    }

    /// Number of transactions with a live single-writer lock
    pub fn active_locks(&self) -> usize {
        self.tx_locks.len()
    }

    async fn load(&self, id: Uuid) -> Result<Transaction> {
        self.transactions
            .get_transaction(id)
            .await?
            .ok_or(Error::TransactionNotFound(id))
    }

    /// Create, verify and, if verified, route a payment.
    ///
    /// The transaction is owned exclusively for the whole call; its status
    /// leaves `pending` only after the verification is in the audit log.
    pub async fn process_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome> {
        if request.amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        let currency = self.fees.ensure_supported(&request.currency)?;

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::now_v7(),
            fan_id: request.fan_id.clone(),
            creator_id: request.creator_id.clone(),
            amount: request.amount,
            currency,
            payment_method: request.payment_method,
            platform: request.platform.clone(),
            processor: None,
            merchant_id: None,
            status: TransactionStatus::Pending,
            risk_score: None,
            verification_id: None,
            created_at: now,
            updated_at: now,
        };

        let id = transaction.id;
        self.owned(id, self.verify_and_route(transaction, request)).await
    }

    async fn verify_and_route(
        &self,
        mut transaction: Transaction,
        request: PaymentRequest,
    ) -> Result<PaymentOutcome> {
        self.transactions.store_transaction(&transaction).await?;

        let mut proof = request.proof;
        proof.amount = proof.amount.or(Some(request.amount));
        let verification = self
            .verify_transaction(VerificationRequest {
                fan_id: request.fan_id,
                creator_id: request.creator_id,
                transaction_id: Some(transaction.id),
                payment_method: request.payment_method,
                platform: request.platform,
                proof,
            })
            .await;

        let verification = match verification {
            Ok(v) => v,
            Err(e) => {
                // Could not evaluate: the transaction must not stay pending
                transaction.transition(TransactionStatus::Failed, Utc::now())?;
                self.transactions.update_transaction(&transaction).await?;
                return Err(e);
            }
        };

        transaction.risk_score = Some(verification.trust_score.score);
        transaction.verification_id = Some(verification.verification_id);

        let mut route = None;
        let mut settlement = None;
        match verification.decision.status {
            VerificationStatus::Verified => {
                let (decision, estimate) = self.route_transaction(&transaction)?;
                transaction.processor = Some(decision.processor.clone());
                transaction.merchant_id = Some(decision.merchant_id.clone());
                transaction.transition(TransactionStatus::Processing, Utc::now())?;
                route = Some(decision);
                settlement = Some(estimate);
            }
            VerificationStatus::Suspicious => {
                transaction.transition(TransactionStatus::RequiresVerification, Utc::now())?;
            }
            VerificationStatus::Rejected => {
                transaction.transition(TransactionStatus::Failed, Utc::now())?;
            }
        }

        self.transactions.update_transaction(&transaction).await?;

        info!(
            "Transaction {} is {} after verification {}",
            transaction.id,
            transaction.status.as_str(),
            verification.verification_id
        );

        Ok(PaymentOutcome {
            transaction,
            verification,
            route,
            settlement,
        })
    }

    fn route_transaction(&self, transaction: &Transaction) -> Result<(RouteDecision, SettlementEstimate)> {
        let ctx = RouteContext {
            platform: transaction.platform.clone(),
            payment_method: transaction.payment_method,
            currency: transaction.currency.clone(),
            amount: transaction.amount,
        };
        let decision = self.router.route(&ctx, transaction.risk_score.unwrap_or(0));
        ROUTING_DECISIONS_TOTAL
            .with_label_values(&[decision.processor.as_str()])
            .inc();

        let estimate = self.fees.estimate(
            transaction.amount,
            &transaction.currency,
            &decision.processor,
            TransactionStatus::Processing,
            Utc::now(),
        )?;
        Ok((decision, estimate))
    }

    /// Release or fail a transaction parked for manual verification
    pub async fn release_reviewed_transaction(&self, id: Uuid, approved: bool) -> Result<PaymentOutcome> {
        self.owned(id, self.release_owned(id, approved)).await
    }

    async fn release_owned(&self, id: Uuid, approved: bool) -> Result<PaymentOutcome> {
        let mut transaction = self.load(id).await?;
        if transaction.status != TransactionStatus::RequiresVerification {
            return Err(Error::InvalidTransition {
                from: transaction.status.as_str().to_string(),
                to: if approved { "processing" } else { "failed" }.to_string(),
            });
        }

        let verification_id = transaction.verification_id.ok_or_else(|| {
            Error::InvalidRequest(format!("transaction {} has no verification", id))
        })?;
        let record = self
            .audit
            .audit_record(verification_id)
            .await?
            .ok_or_else(|| Error::InvalidRequest(format!("audit record {} missing", verification_id)))?;
        let decision = match &record.decision {
            AuditedDecision::Verification(d) => d.clone(),
            AuditedDecision::Refund(_) => {
                return Err(Error::InvalidRequest(format!(
                    "audit record {} is not a verification",
                    verification_id
                )))
            }
        };

        let mut route = None;
        let mut settlement = None;
        if approved {
            let (decision, estimate) = self.route_transaction(&transaction)?;
            transaction.processor = Some(decision.processor.clone());
            transaction.merchant_id = Some(decision.merchant_id.clone());
            transaction.transition(TransactionStatus::Processing, Utc::now())?;
            route = Some(decision);
            settlement = Some(estimate);
        } else {
            transaction.transition(TransactionStatus::Failed, Utc::now())?;
        }

        self.transactions.update_transaction(&transaction).await?;
        info!(
            "Reviewed transaction {} is {}",
            transaction.id,
            transaction.status.as_str()
        );

        Ok(PaymentOutcome {
            verification: VerificationResponse {
                verification_id,
                transaction_id: Some(transaction.id),
                trust_score: record.trust_score,
                decision,
                cross_reference: record.cross_reference,
                signals: record.signals,
                metadata: ResponseMetadata {
                    fail_safe: record.fail_safe.is_some(),
                    ..Default::default()
                },
            },
            transaction,
            route,
            settlement,
        })
    }

    /// Settle a processing transaction as completed or failed
    pub async fn complete_transaction(&self, id: Uuid, succeeded: bool) -> Result<Transaction> {
        self.owned(id, self.complete_owned(id, succeeded)).await
    }

    async fn complete_owned(&self, id: Uuid, succeeded: bool) -> Result<Transaction> {
        let mut transaction = self.load(id).await?;
        let next = if succeeded {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        };
        transaction.transition(next, Utc::now())?;
        self.transactions.update_transaction(&transaction).await?;

        info!("Transaction {} is {}", id, transaction.status.as_str());
        Ok(transaction)
    }

    /// Fees and settlement date for a routed transaction
    pub async fn settlement_estimate(&self, id: Uuid, as_of: DateTime<Utc>) -> Result<SettlementEstimate> {
        let transaction = self.load(id).await?;
        let processor = transaction.processor.as_deref().ok_or_else(|| {
            Error::InvalidRequest(format!("transaction {} has not been routed", id))
        })?;
        self.fees.estimate(
            transaction.amount,
            &transaction.currency,
            processor,
            transaction.status,
            as_of,
        )
    }

    /// Decide a refund request.
    ///
    /// Manual-review outcomes are queued with an SLA deadline. Infrastructure
    /// failures, timeouts and audit failures all end in manual review.
    ///
    /// Each refund id is decided once. Approved and queued refunds together
    /// never exceed the transaction amount; the transaction is owned for the
    /// whole call so concurrent refunds see each other.
    pub async fn process_refund(&self, request: RefundRequest) -> Result<RefundResponse> {
        if request.amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "refund amount must be positive, got {}",
                request.amount
            )));
        }
        self.owned(request.transaction_id, self.refund_owned(request)).await
    }

    async fn refund_owned(&self, request: RefundRequest) -> Result<RefundResponse> {
        let started = Instant::now();
        let transaction = self.load(request.transaction_id).await?;
        if transaction.status != TransactionStatus::Completed {
            return Err(Error::InvalidRequest(format!(
                "transaction {} is {}, only completed payments can be refunded",
                transaction.id,
                transaction.status.as_str()
            )));
        }
        if let Some(existing) = self.refunds.get_refund(request.refund_id).await? {
            return Err(Error::InvalidTransition {
                from: existing.state.as_str().to_string(),
                to: RefundState::Pending.as_str().to_string(),
            });
        }
        let prior = self.refunds.refunds_for(transaction.id).await?;
        let remaining = refund::refundable(transaction.amount, &prior);
        if request.amount > remaining {
            return Err(Error::InvalidRequest(format!(
                "refund {} exceeds refundable balance {} of transaction {}",
                request.amount, remaining, transaction.id
            )));
        }
        let elapsed_secs = (request.requested_at - transaction.created_at).num_seconds();
        if elapsed_secs < 0 {
            return Err(Error::InvalidRequest(
                "refund requested before the original payment".to_string(),
            ));
        }

        let subject = VerificationRequest::for_refund(&transaction, &request);
        let collected = tokio::time::timeout(
            self.overall_budget(),
            self.collectors.collect_all(&subject, self.collector_budget()),
        )
        .await;

        let cross_reference = CrossReferenceResult::not_found();
        let (signals, trust_score, mut decision, mut fail_safe) = match collected {
            Ok(Ok(signals)) => {
                let score = TrustScoreCalculator::new(&self.config)
                    .calculate(&signals, &cross_reference)
                    .trust_score;
                let evidence = refund_evidence(&signals, score, elapsed_secs, &request.evidence);
                let decision = refund::evaluate(evidence, &self.config.refund);
                (signals, score, decision, None)
            }
            Ok(Err(e)) if e.is_infrastructure() => {
                error!("Refund {} evaluation aborted: {}", request.refund_id, e);
                (
                    RiskSignals::default(),
                    fail_safe_score(),
                    self.refund_fail_safe(INFRASTRUCTURE_UNAVAILABLE, elapsed_secs, &request),
                    Some(INFRASTRUCTURE_UNAVAILABLE),
                )
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("Refund {} evaluation timed out", request.refund_id);
                (
                    RiskSignals::default(),
                    fail_safe_score(),
                    self.refund_fail_safe(VERIFICATION_TIMEOUT, elapsed_secs, &request),
                    Some(VERIFICATION_TIMEOUT),
                )
            }
        };

        let degraded_signals: Vec<String> = signals
            .unavailable
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        let audit_id = Uuid::now_v7();
        let written = match AuditRecord::new(
            audit_id,
            Some(transaction.id),
            Some(request.refund_id),
            signals,
            cross_reference,
            trust_score,
            AuditedDecision::Refund(decision.clone()),
            fail_safe.map(String::from),
        ) {
            Ok(record) => self.audit.store_audit_record(record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!("Audit write for refund {} failed: {}", request.refund_id, e);
            decision = self.refund_fail_safe(AUDIT_UNAVAILABLE, elapsed_secs, &request);
            fail_safe = Some(AUDIT_UNAVAILABLE);
        }

        let state = decision.outcome.state();
        self.refunds
            .store_refund(RefundEntry {
                refund_id: request.refund_id,
                transaction_id: transaction.id,
                amount: request.amount,
                state,
                audit_id,
                decided_at: Utc::now(),
            })
            .await?;

        let mut review_deadline_at = None;
        if decision.outcome == RefundOutcome::ManualReview {
            let enqueued_at = Utc::now();
            let deadline = review_deadline(enqueued_at, &self.config.refund);
            self.review_queue
                .enqueue(ReviewTicket {
                    refund_id: request.refund_id,
                    transaction_id: transaction.id,
                    fan_id: transaction.fan_id.clone(),
                    reason: decision.reason.clone(),
                    enqueued_at,
                    deadline,
                })
                .await?;
            review_deadline_at = Some(deadline);
        }

        REFUND_DECISIONS_TOTAL
            .with_label_values(&[decision.outcome.as_str()])
            .inc();
        info!(
            "Refund {} for transaction {}: {} ({})",
            request.refund_id,
            transaction.id,
            decision.outcome.as_str(),
            decision.reason
        );

        Ok(RefundResponse {
            refund_id: request.refund_id,
            transaction_id: transaction.id,
            state,
            trust_score,
            review_deadline: review_deadline_at,
            metadata: ResponseMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                degraded_signals,
                adapters_queried: 0,
                fail_safe: fail_safe.is_some(),
            },
            decision,
        })
    }

    fn refund_fail_safe(&self, code: &str, elapsed_secs: i64, request: &RefundRequest) -> RefundDecision {
        refund::fail_safe(code, elapsed_secs, &request.evidence)
    }
}
