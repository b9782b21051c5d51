//! # Processor adapters
//!
//! Reference implementations of the trust engine's `ProcessorAdapter`
//! seam, one per payment rail:
//! - Card processors (charge id, or email + last4 in a time window)
//! - Crypto processors (transaction hash with confirmation depth)
//! - Bank transfer / payout rails (payment reference, or remitter + amount)
//!
//! Each adapter can be wrapped in a [`GuardedAdapter`] that adds a lookup
//! timeout and a per-processor circuit breaker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        ProcessorRegistry (trust-engine)     │
//! └──────────────────────┬──────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────┐
//! │    GuardedAdapter (timeout + breaker)       │
//! └──────┬───────────────┬───────────────┬──────┘
//!        │               │               │
//!   ┌────▼────┐     ┌────▼────┐     ┌────▼────┐
//!   │  Card   │     │ Crypto  │     │  Bank   │
//!   └─────────┘     └─────────┘     └─────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod bank;
pub mod book;
pub mod card;
pub mod circuit_breaker;
pub mod crypto;
pub mod error;
pub mod metrics;

pub use bank::{BankCredit, BankTransferAdapter};
pub use card::{CardCharge, CardProcessorAdapter};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, GuardedAdapter};
pub use crypto::{ChainTransfer, CryptoProcessorAdapter};
pub use error::{Error, Result};

/// Default circuit breaker threshold (failures before opening)
pub const DEFAULT_CB_FAILURE_THRESHOLD: u32 = 5;

/// Default circuit breaker timeout (seconds before half-open)
pub const DEFAULT_CB_TIMEOUT_SECONDS: u64 = 60;

/// Default lookup timeout (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;
