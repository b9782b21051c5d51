//! Processor cross-reference
//!
//! Fans a proof out to every registered processor adapter at once, each
//! under its own timeout, and keeps the strongest match. Misses, errors and
//! timeouts are all evidence of "not corroborated", never failures.

use crate::metrics::CROSS_REFERENCE_DURATION;
use crate::types::{CrossReferenceResult, PaymentMethodKind, TransactionProof};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A processor-side record matching a proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorMatch {
    /// Processor-side reference
    pub processor_reference: String,
    /// 0-100, how strongly the record matches the proof
    pub confidence: u8,
    /// Amount on the processor record
    pub amount: Option<Decimal>,
    /// Currency on the processor record
    pub currency: Option<String>,
}

/// Payment processor lookup, one implementation per processor
#[async_trait]
pub trait ProcessorAdapter: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Whether this processor handles `method`
    fn supports(&self, _method: PaymentMethodKind) -> bool {
        true
    }

    /// Find a record corroborating `proof`
    async fn lookup_transaction(&self, proof: &TransactionProof) -> Result<Option<ProcessorMatch>>;
}

/// Adapters registered by name
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    adapters: BTreeMap<String, Arc<dyn ProcessorAdapter>>,
}

impl ProcessorRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter; names must be unique
    pub fn register(&mut self, adapter: Arc<dyn ProcessorAdapter>) -> Result<()> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            return Err(Error::PolicyMisconfiguration(format!(
                "processor adapter '{}' registered twice",
                name
            )));
        }
        info!("Registered processor adapter: {}", name);
        self.adapters.insert(name, adapter);
        Ok(())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Number of adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapter is registered
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Adapters able to look up `method`
    pub fn supporting(&self, method: PaymentMethodKind) -> usize {
        self.adapters.values().filter(|a| a.supports(method)).count()
    }

    /// Query every supporting adapter concurrently, each under `budget`
    pub async fn cross_reference(
        &self,
        proof: &TransactionProof,
        method: PaymentMethodKind,
        budget: Duration,
    ) -> CrossReferenceResult {
        let started = Instant::now();
        let candidates: Vec<_> = self
            .adapters
            .iter()
            .filter(|(_, adapter)| adapter.supports(method))
            .collect();

        let lookups = candidates.iter().map(|(name, adapter)| async move {
            let outcome = match tokio::time::timeout(budget, adapter.lookup_transaction(proof)).await {
                Ok(Ok(found)) => Ok(found),
                Ok(Err(e)) => {
                    warn!("Processor {} lookup failed: {}", name, e);
                    Err(())
                }
                Err(_) => {
                    warn!("Processor {} lookup exceeded {}ms", name, budget.as_millis());
                    Err(())
                }
            };
            (name.as_str(), outcome)
        });
        let outcomes = join_all(lookups).await;

        let mut result = CrossReferenceResult::not_found();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(Some(m)) if m.confidence > 0 => {
                    // Registry order breaks ties
                    if m.confidence.min(100) > result.confidence {
                        result.found = true;
                        result.processor = Some(name.to_string());
                        result.confidence = m.confidence.min(100);
                        result.processor_reference = Some(m.processor_reference);
                    }
                }
                Ok(_) => debug!("Processor {} has no matching record", name),
                Err(()) => result.unavailable.push(name.to_string()),
            }
        }

        CROSS_REFERENCE_DURATION
            .with_label_values(&[if result.found { "true" } else { "false" }])
            .observe(started.elapsed().as_secs_f64());

        result
    }
}
