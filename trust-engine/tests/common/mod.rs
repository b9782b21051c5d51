//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use trust_engine::audit::AuditRecord;
use trust_engine::signals::{
    BehavioralSignals, DeviceSignals, NetworkSignals, PaymentSignals, PlatformRiskLevel,
    PlatformSignals, SignalCollector, SignalKind,
};
use trust_engine::store::AuditStore;
use trust_engine::{
    EngineConfig, EngineDeps, Error, InMemoryAuditLog, InMemoryRefundStore, InMemoryReviewQueue,
    InMemoryTransactionStore, PaymentMethodKind, PaymentRequest, PaymentRouter, ProcessorAdapter,
    ProcessorMatch, ProcessorRegistry, Result, SignalCollectors, TransactionProof, TrustEngine,
    VerificationRequest,
};
use uuid::Uuid;

/// What a fixed collector does when called
pub enum Behaviour<T> {
    Value(T),
    Degraded,
    Offline,
    Hang,
}

pub struct FixedCollector<T> {
    kind: SignalKind,
    behaviour: Behaviour<T>,
}

#[async_trait]
impl<T: Clone + Default + Send + Sync + 'static> SignalCollector for FixedCollector<T> {
    type Signal = T;

    fn kind(&self) -> SignalKind {
        self.kind
    }

    fn cache_key(&self, _request: &VerificationRequest) -> Option<String> {
        None
    }

    async fn collect(&self, _request: &VerificationRequest) -> Result<T> {
        match &self.behaviour {
            Behaviour::Value(v) => Ok(v.clone()),
            Behaviour::Degraded => Err(Error::unavailable(self.kind.as_str(), "feed returned 503")),
            Behaviour::Offline => Err(Error::Infrastructure("cache cluster unreachable".to_string())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(T::default())
            }
        }
    }
}

pub fn fixed<T: Clone + Default + Send + Sync + 'static>(
    kind: SignalKind,
    behaviour: Behaviour<T>,
) -> Arc<FixedCollector<T>> {
    Arc::new(FixedCollector { kind, behaviour })
}

pub fn reference_device() -> DeviceSignals {
    DeviceSignals {
        fingerprint: Some("fp-abc".to_string()),
        reputation: Some(90),
        velocity_per_hour: Some(2),
        is_new: false,
        flags: Vec::new(),
    }
}

pub fn reference_network() -> NetworkSignals {
    NetworkSignals {
        ip_address: Some("203.0.113.9".to_string()),
        ip_reputation: Some(85),
        country: Some("US".to_string()),
        country_risk: Some(10),
        ..Default::default()
    }
}

pub fn reference_payment() -> PaymentSignals {
    PaymentSignals {
        method: Some(PaymentMethodKind::Card),
        risk_score: Some(20),
        ..Default::default()
    }
}

pub fn reference_behavioral() -> BehavioralSignals {
    BehavioralSignals {
        account_age_days: Some(500),
        refund_rate_pct: Some(2),
        ..Default::default()
    }
}

pub fn reference_platform() -> PlatformSignals {
    PlatformSignals {
        risk_level: Some(PlatformRiskLevel::Low),
        ..Default::default()
    }
}

/// Collectors reproducing the reference fan: score 86
pub fn reference_collectors() -> SignalCollectors {
    SignalCollectors {
        device: fixed(SignalKind::Device, Behaviour::Value(reference_device())),
        network: fixed(SignalKind::Network, Behaviour::Value(reference_network())),
        payment: fixed(SignalKind::Payment, Behaviour::Value(reference_payment())),
        behavioral: fixed(SignalKind::Behavioral, Behaviour::Value(reference_behavioral())),
        platform: fixed(SignalKind::Platform, Behaviour::Value(reference_platform())),
    }
}

/// Processor adapter that matches every proof at a fixed confidence
pub struct MatchingProcessor {
    pub name: &'static str,
    pub confidence: u8,
}

#[async_trait]
impl ProcessorAdapter for MatchingProcessor {
    fn name(&self) -> &str {
        self.name
    }

    async fn lookup_transaction(&self, proof: &TransactionProof) -> Result<Option<ProcessorMatch>> {
        Ok(Some(ProcessorMatch {
            processor_reference: proof
                .transaction_ref
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            confidence: self.confidence,
            amount: proof.amount,
            currency: None,
        }))
    }
}

/// Audit store that is always down
pub struct BrokenAuditStore;

#[async_trait]
impl AuditStore for BrokenAuditStore {
    async fn store_audit_record(&self, _record: AuditRecord) -> Result<()> {
        Err(Error::Infrastructure("audit database unreachable".to_string()))
    }

    async fn audit_record(&self, _verification_id: Uuid) -> Result<Option<AuditRecord>> {
        Err(Error::Infrastructure("audit database unreachable".to_string()))
    }
}

pub struct Harness {
    pub engine: TrustEngine,
    pub audit: Arc<InMemoryAuditLog>,
    pub transactions: Arc<InMemoryTransactionStore>,
    pub review_queue: Arc<InMemoryReviewQueue>,
    pub refunds: Arc<InMemoryRefundStore>,
}

pub fn stripe_registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry
        .register(Arc::new(MatchingProcessor {
            name: "stripe",
            confidence: 95,
        }))
        .unwrap();
    registry
}

pub fn harness_with(config: EngineConfig, collectors: SignalCollectors) -> Harness {
    harness_full(config, collectors, stripe_registry(), None)
}

pub fn harness_full(
    config: EngineConfig,
    collectors: SignalCollectors,
    processors: ProcessorRegistry,
    audit_override: Option<Arc<dyn AuditStore>>,
) -> Harness {
    let audit = Arc::new(InMemoryAuditLog::new());
    let transactions = Arc::new(InMemoryTransactionStore::new());
    let review_queue = Arc::new(InMemoryReviewQueue::new());
    let refunds = Arc::new(InMemoryRefundStore::new());
    let router = Arc::new(PaymentRouter::new(&config.routing));
    let audit_store: Arc<dyn AuditStore> = match audit_override {
        Some(store) => store,
        None => audit.clone(),
    };

    let engine = TrustEngine::new(
        config,
        EngineDeps {
            collectors,
            processors,
            audit: audit_store,
            transactions: transactions.clone(),
            review_queue: review_queue.clone(),
            refunds: refunds.clone(),
            router,
        },
    )
    .unwrap();

    Harness {
        engine,
        audit,
        transactions,
        review_queue,
        refunds,
    }
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default(), reference_collectors())
}

pub fn proof(at: DateTime<Utc>) -> TransactionProof {
    TransactionProof {
        email: "fan42@example.com".to_string(),
        timestamp: at,
        transaction_ref: Some("ch_3Nq".to_string()),
        card_last4: Some("4242".to_string()),
        device_fingerprint: Some("fp-abc".to_string()),
        ip_address: Some("203.0.113.9".to_string()),
        amount: Some(dec!(9.99)),
    }
}

pub fn verification_request() -> VerificationRequest {
    VerificationRequest {
        fan_id: "fan-42".to_string(),
        creator_id: "creator-7".to_string(),
        transaction_id: None,
        payment_method: PaymentMethodKind::Card,
        platform: "web".to_string(),
        proof: proof(Utc::now()),
    }
}

pub fn payment_request() -> PaymentRequest {
    PaymentRequest {
        fan_id: "fan-42".to_string(),
        creator_id: "creator-7".to_string(),
        amount: dec!(9.99),
        currency: "usd".to_string(),
        payment_method: PaymentMethodKind::Card,
        platform: "web".to_string(),
        proof: proof(Utc::now()),
    }
}
