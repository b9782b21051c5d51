//! Payment router
//!
//! Rules are evaluated in ascending priority; the first enabled rule whose
//! every set condition matches wins. The rule list is shared behind an
//! `Arc` and replaced wholesale on reload, so a request always sees one
//! consistent list.

use crate::config::RoutingConfig;
use crate::types::PaymentMethodKind;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reason attached when no rule matched
pub const DEFAULT_ROUTING_REASON: &str = "default routing";

/// Conditions a request must satisfy; unset fields match anything
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuleConditions {
    /// Client platform, case-insensitive
    pub platform: Option<String>,
    /// Payment method
    pub payment_method: Option<PaymentMethodKind>,
    /// Inclusive lower bound on the trust score
    pub min_trust_score: Option<u8>,
    /// Inclusive upper bound on the trust score
    pub max_trust_score: Option<u8>,
    /// ISO 4217 currency, case-insensitive
    pub currency: Option<String>,
    /// Inclusive lower bound on the amount
    pub min_amount: Option<Decimal>,
    /// Inclusive upper bound on the amount
    pub max_amount: Option<Decimal>,
}

impl RuleConditions {
    fn matches(&self, ctx: &RouteContext, trust_score: u8) -> bool {
        let text_matches = |want: &Option<String>, have: &str| {
            want.as_deref().map_or(true, |w| w.eq_ignore_ascii_case(have))
        };

        text_matches(&self.platform, &ctx.platform)
            && self.payment_method.map_or(true, |m| m == ctx.payment_method)
            && self.min_trust_score.map_or(true, |min| trust_score >= min)
            && self.max_trust_score.map_or(true, |max| trust_score <= max)
            && text_matches(&self.currency, &ctx.currency)
            && self.min_amount.map_or(true, |min| ctx.amount >= min)
            && self.max_amount.map_or(true, |max| ctx.amount <= max)
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Routing rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Unique rule name, cited in the routing reason
    pub name: String,

    /// Lower runs first
    pub priority: i32,

    /// Disabled rules are skipped
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Match predicate
    #[serde(default)]
    pub conditions: RuleConditions,

    /// Processor to use
    pub target_processor: String,

    /// Merchant account to use
    pub target_merchant_id: String,
}

impl RoutingRule {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::PolicyMisconfiguration("routing rule without a name".to_string()));
        }
        if self.target_processor.trim().is_empty() || self.target_merchant_id.trim().is_empty() {
            return Err(Error::PolicyMisconfiguration(format!(
                "routing rule '{}' has no target",
                self.name
            )));
        }
        let c = &self.conditions;
        if let (Some(min), Some(max)) = (c.min_trust_score, c.max_trust_score) {
            if min > max {
                return Err(Error::PolicyMisconfiguration(format!(
                    "routing rule '{}' has min trust score {} above max {}",
                    self.name, min, max
                )));
            }
        }
        if let (Some(min), Some(max)) = (c.min_amount, c.max_amount) {
            if min > max {
                return Err(Error::PolicyMisconfiguration(format!(
                    "routing rule '{}' has min amount {} above max {}",
                    self.name, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Request attributes routing looks at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteContext {
    /// Client platform
    pub platform: String,
    /// Payment method
    pub payment_method: PaymentMethodKind,
    /// ISO 4217 currency
    pub currency: String,
    /// Amount
    pub amount: Decimal,
}

/// Routing outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Selected processor
    pub processor: String,
    /// Selected merchant account
    pub merchant_id: String,
    /// Why
    pub reason: String,
    /// Matched rule, `None` for default routing
    pub rule_name: Option<String>,
}

/// Routing rule source
#[async_trait]
pub trait RoutingRuleStore: Send + Sync {
    /// Current rule set
    async fn load_routing_rules(&self) -> Result<Vec<RoutingRule>>;
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RoutingRule>,
}

/// Rules read from a TOML file with `[[rules]]` tables
pub struct TomlRuleStore {
    path: PathBuf,
}

impl TomlRuleStore {
    /// Create new store over `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RoutingRuleStore for TomlRuleStore {
    async fn load_routing_rules(&self) -> Result<Vec<RoutingRule>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let file: RuleFile = toml::from_str(&content).map_err(|e| {
            Error::PolicyMisconfiguration(format!(
                "Failed to parse routing rules {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(file.rules)
    }
}

/// Payment router
pub struct PaymentRouter {
    rules: RwLock<Arc<Vec<RoutingRule>>>,
    default_processor: String,
    default_merchant_id: String,
}

impl PaymentRouter {
    /// Create new router with no rules
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
            default_processor: config.default_processor.clone(),
            default_merchant_id: config.default_merchant_id.clone(),
        }
    }

    /// Create new router with an initial rule set
    pub fn with_rules(config: &RoutingConfig, rules: Vec<RoutingRule>) -> Result<Self> {
        let router = Self::new(config);
        router.reload(rules)?;
        Ok(router)
    }

    /// Snapshot of the active rules, in evaluation order
    pub fn rules(&self) -> Arc<Vec<RoutingRule>> {
        self.rules.read().clone()
    }

    /// Validate, sort and swap in a new rule list; the old list stays on error
    pub fn reload(&self, mut rules: Vec<RoutingRule>) -> Result<usize> {
        let mut names = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !names.insert(rule.name.as_str()) {
                return Err(Error::PolicyMisconfiguration(format!(
                    "duplicate routing rule '{}'",
                    rule.name
                )));
            }
        }

        // Stable: equal priorities keep their file order
        rules.sort_by_key(|r| r.priority);
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);

        info!("Loaded {} routing rules", count);
        Ok(count)
    }

    /// Pick a processor; always returns a decision
    pub fn route(&self, ctx: &RouteContext, trust_score: u8) -> RouteDecision {
        let rules = self.rules();

        for rule in rules.iter().filter(|r| r.enabled) {
            if rule.conditions.matches(ctx, trust_score) {
                debug!("Rule '{}' matched ({} via {})", rule.name, ctx.payment_method, ctx.platform);
                return RouteDecision {
                    processor: rule.target_processor.clone(),
                    merchant_id: rule.target_merchant_id.clone(),
                    reason: format!("matched rule '{}'", rule.name),
                    rule_name: Some(rule.name.clone()),
                };
            }
        }

        RouteDecision {
            processor: self.default_processor.clone(),
            merchant_id: self.default_merchant_id.clone(),
            reason: DEFAULT_ROUTING_REASON.to_string(),
            rule_name: None,
        }
    }

    /// Poll `store` every `interval` and reload on success
    pub fn spawn_refresh(
        self: &Arc<Self>,
        store: Arc<dyn RoutingRuleStore>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match store.load_routing_rules().await {
                    Ok(rules) => {
                        if *router.rules() == rules {
                            continue;
                        }
                        if let Err(e) = router.reload(rules) {
                            warn!("Rejected routing rule update, keeping previous rules: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to load routing rules: {}", e),
                }
            }
        })
    }
}
