//! Trust engine for creator-platform payments
//!
//! Scores fan payments from device, network, payment, behavioral and
//! platform signals, corroborates them against processor records, decides
//! verify/review/reject, routes verified payments and applies the refund
//! policy. Every decision is audited and replayable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod cross_reference;
pub mod decision;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod fees;
pub mod memory;
pub mod metrics;
pub mod refund;
pub mod routing;
pub mod scoring;
pub mod signals;
pub mod store;
pub mod types;
pub mod velocity;

pub use audit::{replay, AuditRecord, AuditedDecision, ReplayReport};
pub use config::EngineConfig;
pub use cross_reference::{ProcessorAdapter, ProcessorMatch, ProcessorRegistry};
pub use engine::{EngineDeps, PaymentOutcome, TrustEngine};
pub use error::{Error, Result};
pub use escrow::{EscrowBook, HolderChange};
pub use fees::{FeeCalculator, SettlementEstimate};
pub use memory::InMemorySignalStore;
pub use routing::{PaymentRouter, RouteDecision, RoutingRule};
pub use scoring::TrustScoreCalculator;
pub use signals::{RiskSignals, SignalCollectors};
pub use store::{
    InMemoryAuditLog, InMemoryRefundStore, InMemoryReviewQueue, InMemoryTransactionStore,
};
pub use types::*;
pub use velocity::VelocityTracker;
