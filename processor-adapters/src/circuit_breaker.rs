//! Circuit breaker per processor adapter
//!
//! [`GuardedAdapter`] wraps any [`ProcessorAdapter`]. After repeated
//! failures the circuit opens and lookups fail fast, which the registry
//! records as an unavailable adapter.

use crate::metrics::{PROCESSOR_CIRCUIT_STATE, PROCESSOR_LOOKUPS_TOTAL, PROCESSOR_LOOKUP_DURATION};
use crate::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use trust_engine::{PaymentMethodKind, ProcessorAdapter, ProcessorMatch, TransactionProof};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Closed (normal operation)
    Closed,
    /// Open (rejecting requests)
    Open,
    /// Half-open (testing)
    HalfOpen,
}

impl CircuitState {
    fn gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure threshold (open after N consecutive failures)
    pub failure_threshold: u32,
    /// Timeout (seconds before half-open)
    pub timeout_seconds: u64,
    /// Success threshold (close after N successes in half-open)
    pub success_threshold: u32,
    /// Per-lookup budget (milliseconds); exceeding it counts as a failure
    pub request_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: crate::DEFAULT_CB_FAILURE_THRESHOLD,
            timeout_seconds: crate::DEFAULT_CB_TIMEOUT_SECONDS,
            success_threshold: 2,
            request_timeout_ms: crate::DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            config,
        }
    }

    /// Check if a request is allowed at `now`
    pub fn is_request_allowed(&mut self, processor: &str, now: DateTime<Utc>) -> crate::Result<()> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_at
                    .map(|at| now.signed_duration_since(at).num_seconds().max(0) as u64)
                    .unwrap_or(u64::MAX);

                if elapsed >= self.config.timeout_seconds {
                    info!("Circuit breaker half-opening for processor {}", processor);
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    Ok(())
                } else {
                    Err(Error::CircuitBreakerOpen {
                        processor: processor.to_string(),
                        reason: format!(
                            "Circuit open, retry in {}s",
                            self.config.timeout_seconds - elapsed
                        ),
                    })
                }
            }
        }
    }

    /// Record success
    pub fn record_success(&mut self, processor: &str) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    info!("Circuit breaker closing for processor {}", processor);
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record failure at `now`
    pub fn record_failure(&mut self, processor: &str, now: DateTime<Utc>) {
        self.failure_count += 1;
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opening for processor {} after {} failures",
                        processor, self.failure_count
                    );
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker re-opening for processor {}", processor);
                self.state = CircuitState::Open;
                self.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Reset circuit breaker (manual intervention)
    pub fn reset(&mut self, processor: &str) {
        info!("Manually resetting circuit breaker for processor {}", processor);
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.last_failure_at = None;
    }
}

/// Processor adapter behind a circuit breaker and a lookup timeout
pub struct GuardedAdapter<A> {
    inner: A,
    breaker: Mutex<CircuitBreaker>,
    request_timeout: Duration,
}

impl<A: ProcessorAdapter> GuardedAdapter<A> {
    /// Wrap `inner`
    pub fn new(inner: A, config: CircuitBreakerConfig) -> Self {
        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        PROCESSOR_CIRCUIT_STATE
            .with_label_values(&[inner.name()])
            .set(CircuitState::Closed.gauge());
        Self {
            inner,
            breaker: Mutex::new(CircuitBreaker::new(config)),
            request_timeout,
        }
    }

    /// Current circuit state
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().state()
    }

    /// Close the circuit by hand
    pub fn reset(&self) {
        let mut breaker = self.breaker.lock();
        breaker.reset(self.inner.name());
        self.publish(breaker.state());
    }

    /// Wrapped adapter
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn publish(&self, state: CircuitState) {
        PROCESSOR_CIRCUIT_STATE
            .with_label_values(&[self.inner.name()])
            .set(state.gauge());
    }

    fn count(&self, status: &str) {
        PROCESSOR_LOOKUPS_TOTAL
            .with_label_values(&[self.inner.name(), status])
            .inc();
    }
}

#[async_trait]
impl<A: ProcessorAdapter> ProcessorAdapter for GuardedAdapter<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports(&self, method: PaymentMethodKind) -> bool {
        self.inner.supports(method)
    }

    async fn lookup_transaction(
        &self,
        proof: &TransactionProof,
    ) -> trust_engine::Result<Option<ProcessorMatch>> {
        let name = self.inner.name();
        {
            let mut breaker = self.breaker.lock();
            let allowed = breaker.is_request_allowed(name, Utc::now());
            self.publish(breaker.state());
            if let Err(e) = allowed {
                drop(breaker);
                self.count("rejected");
                return Err(e.into_engine(name));
            }
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.request_timeout, self.inner.lookup_transaction(proof)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                millis: self.request_timeout.as_millis() as u64,
                operation: format!("{} lookup", name),
            }
            .into_engine(name)),
        };
        PROCESSOR_LOOKUP_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());

        let state = {
            let mut breaker = self.breaker.lock();
            match &outcome {
                Ok(_) => breaker.record_success(name),
                Err(_) => breaker.record_failure(name, Utc::now()),
            }
            breaker.state()
        };
        self.publish(state);

        self.count(match &outcome {
            Ok(Some(_)) => "found",
            Ok(None) => "miss",
            Err(_) => "error",
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[test]
    fn test_circuit_breaker_transitions() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            timeout_seconds: 2,
            success_threshold: 2,
            request_timeout_ms: 100,
        };
        let now = Utc::now();
        let mut cb = CircuitBreaker::new(config);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_request_allowed("stripe", now).is_ok());

        cb.record_failure("stripe", now);
        cb.record_failure("stripe", now);
        cb.record_failure("stripe", now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_request_allowed("stripe", now).is_err());

        // Half-opens after the timeout, closes after two successes
        let later = now + ChronoDuration::seconds(3);
        assert!(cb.is_request_allowed("stripe", later).is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success("stripe");
        cb.record_success("stripe");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout_seconds: 1,
            success_threshold: 2,
            request_timeout_ms: 100,
        });
        let now = Utc::now();
        cb.record_failure("ccbill", now);
        let later = now + ChronoDuration::seconds(2);
        assert!(cb.is_request_allowed("ccbill", later).is_ok());
        cb.record_failure("ccbill", later);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    struct Flaky {
        failing: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProcessorAdapter for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn lookup_transaction(
            &self,
            _proof: &TransactionProof,
        ) -> trust_engine::Result<Option<ProcessorMatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(trust_engine::Error::AdapterUnavailable {
                    processor: "flaky".to_string(),
                    reason: "502".to_string(),
                })
            } else {
                Ok(None)
            }
        }
    }

    fn proof() -> TransactionProof {
        TransactionProof {
            email: "fan@example.com".to_string(),
            timestamp: Utc::now(),
            transaction_ref: None,
            card_last4: None,
            device_fingerprint: None,
            ip_address: None,
            amount: None,
        }
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let guarded = GuardedAdapter::new(
            Flaky {
                failing: AtomicBool::new(true),
                calls: AtomicU32::new(0),
            },
            CircuitBreakerConfig {
                failure_threshold: 2,
                timeout_seconds: 60,
                success_threshold: 1,
                request_timeout_ms: 100,
            },
        );

        assert!(guarded.lookup_transaction(&proof()).await.is_err());
        assert!(guarded.lookup_transaction(&proof()).await.is_err());
        assert_eq!(guarded.circuit_state(), CircuitState::Open);

        // Rejected without reaching the processor
        let err = guarded.lookup_transaction(&proof()).await.unwrap_err();
        assert!(matches!(err, trust_engine::Error::AdapterUnavailable { .. }));
        assert_eq!(guarded.inner().calls.load(Ordering::SeqCst), 2);

        guarded.inner().failing.store(false, Ordering::SeqCst);
        guarded.reset();
        assert!(guarded.lookup_transaction(&proof()).await.unwrap().is_none());
    }

    struct Slow;

    #[async_trait]
    impl ProcessorAdapter for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn lookup_transaction(
            &self,
            _proof: &TransactionProof,
        ) -> trust_engine::Result<Option<ProcessorMatch>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_slow_lookup_counts_as_failure() {
        let guarded = GuardedAdapter::new(
            Slow,
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout_seconds: 60,
                success_threshold: 1,
                request_timeout_ms: 20,
            },
        );
        assert!(guarded.lookup_transaction(&proof()).await.is_err());
        assert_eq!(guarded.circuit_state(), CircuitState::Open);
    }
}
