//! Short-lived signal cache
//!
//! Wraps any [`SignalCollector`] with a TTL map keyed by the collector's
//! subject key. Concurrent misses for the same key both recompute and the
//! last write wins; entries are idempotent so the race is harmless.
//! Expired entries are swept on insert every `sweep_interval` writes.

use super::{SignalCollector, SignalKind};
use crate::config::MAX_CACHE_TTL_SECONDS;
use crate::types::VerificationRequest;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Inserts between sweeps of expired entries
pub const DEFAULT_SWEEP_INTERVAL: usize = 256;

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

/// TTL cache in front of a collector
pub struct CachedCollector<C: SignalCollector> {
    inner: C,
    ttl: Duration,
    entries: DashMap<String, Entry<C::Signal>>,
    sweep_interval: usize,
    inserts: AtomicUsize,
}

impl<C: SignalCollector> CachedCollector<C> {
    /// Wrap `inner`; TTL is capped at five minutes
    pub fn new(inner: C, ttl: Duration) -> Self {
        Self {
            inner,
            ttl: ttl.min(Duration::from_secs(MAX_CACHE_TTL_SECONDS)),
            entries: DashMap::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            inserts: AtomicUsize::new(0),
        }
    }

    /// Sweep expired entries every `interval` inserts (minimum 1)
    pub fn with_sweep_interval(mut self, interval: usize) -> Self {
        self.sweep_interval = interval.max(1);
        self
    }

    /// Effective TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of cached entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
    }

    fn store(&self, key: String, value: C::Signal) {
        let n = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.sweep_interval == 0 {
            let before = self.entries.len();
            self.purge_expired();
            debug!(
                "{} cache swept {} expired entries",
                self.inner.kind(),
                before.saturating_sub(self.entries.len())
            );
        }
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    fn lookup(&self, key: &str) -> Option<C::Signal> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl<C: SignalCollector> SignalCollector for CachedCollector<C> {
    type Signal = C::Signal;

    fn kind(&self) -> SignalKind {
        self.inner.kind()
    }

    fn cache_key(&self, request: &VerificationRequest) -> Option<String> {
        self.inner.cache_key(request)
    }

    async fn collect(&self, request: &VerificationRequest) -> Result<C::Signal> {
        let key = match self.inner.cache_key(request) {
            Some(key) if !self.ttl.is_zero() => key,
            _ => return self.inner.collect(request).await,
        };

        if let Some(hit) = self.lookup(&key) {
            debug!("{} cache hit for {}", self.inner.kind(), key);
            return Ok(hit);
        }

        // Errors are never cached
        let value = self.inner.collect(request).await?;
        self.store(key, value.clone());
        Ok(value)
    }
}
