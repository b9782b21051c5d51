//! Configuration for the trust engine
//!
//! Every scoring weight, threshold and policy constant lives here so
//! operators can retune without touching decision logic.

use crate::signals::PlatformRiskLevel;
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Upper bound for any signal cache TTL
pub const MAX_CACHE_TTL_SECONDS: u64 = 300;

/// Trust engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Service name
    pub service_name: String,

    /// Sub-score weights
    pub weights: ScoreWeights,

    /// Device sub-score rules
    pub device: DeviceRules,

    /// Network sub-score rules
    pub network: NetworkRules,

    /// Payment sub-score rules
    pub payment: PaymentRules,

    /// Behavioral sub-score rules
    pub behavioral: BehavioralRules,

    /// Platform sub-score rules
    pub platform: PlatformRules,

    /// Confidence increments
    pub confidence: ConfidenceRules,

    /// Verification thresholds
    pub decision: DecisionThresholds,

    /// Refund policy
    pub refund: RefundPolicyConfig,

    /// Call budgets
    pub timeouts: TimeoutConfig,

    /// Signal cache TTL (seconds, capped at 300)
    pub cache_ttl_seconds: u64,

    /// Fee schedule
    pub fees: FeeConfig,

    /// Routing defaults
    pub routing: RoutingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "trust-engine".to_string(),
            weights: ScoreWeights::default(),
            device: DeviceRules::default(),
            network: NetworkRules::default(),
            payment: PaymentRules::default(),
            behavioral: BehavioralRules::default(),
            platform: PlatformRules::default(),
            confidence: ConfidenceRules::default(),
            decision: DecisionThresholds::default(),
            refund: RefundPolicyConfig::default(),
            timeouts: TimeoutConfig::default(),
            cache_ttl_seconds: 60,
            fees: FeeConfig::default(),
            routing: RoutingConfig::default(),
        }
    }
}

/// Sub-score weights; must sum to 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Cross-reference confidence (feeds confidence, not score, by default)
    pub cross_reference: f64,
    /// Device
    pub device: f64,
    /// Network
    pub network: f64,
    /// Payment
    pub payment: f64,
    /// Behavioral
    pub behavioral: f64,
    /// Platform
    pub platform: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            cross_reference: 0.0,
            device: 0.25,
            network: 0.20,
            payment: 0.15,
            behavioral: 0.30,
            platform: 0.10,
        }
    }
}

impl ScoreWeights {
    fn sum(&self) -> f64 {
        self.cross_reference + self.device + self.network + self.payment + self.behavioral
            + self.platform
    }

    fn all(&self) -> [f64; 6] {
        [
            self.cross_reference,
            self.device,
            self.network,
            self.payment,
            self.behavioral,
            self.platform,
        ]
    }
}

/// Device sub-score rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRules {
    /// Transactions per hour before the velocity penalty applies
    pub hourly_velocity_cap: u32,
    /// Penalty when the cap is exceeded
    pub velocity_penalty: i32,
    /// Penalty for a never-seen device
    pub new_device_penalty: i32,
    /// Penalty per suspicious-pattern flag
    pub flag_penalty: i32,
}

impl Default for DeviceRules {
    fn default() -> Self {
        Self {
            hourly_velocity_cap: 10,
            velocity_penalty: 30,
            new_device_penalty: 10,
            flag_penalty: 15,
        }
    }
}

/// Network sub-score rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRules {
    /// Penalty for Tor/VPN/proxy
    pub anonymizer_penalty: i32,
    /// Penalty for hosting/bulletproof ISPs
    pub suspicious_isp_penalty: i32,
    /// Travel speed (km/h) between consecutive sightings considered impossible
    pub geovelocity_limit_kmh: u32,
    /// Penalty for impossible travel
    pub geovelocity_penalty: i32,
    /// Country risk above which the penalty applies
    pub country_risk_limit: u8,
    /// Penalty for a high-risk country
    pub country_risk_penalty: i32,
    /// ISO 3166 alpha-2 codes scored as high risk
    pub high_risk_countries: Vec<String>,
    /// ISO 3166 alpha-2 codes scored as medium risk
    pub medium_risk_countries: Vec<String>,
    /// Risk assigned to high-risk countries
    pub high_country_risk: u8,
    /// Risk assigned to medium-risk countries
    pub medium_country_risk: u8,
    /// Risk assigned to every other known country
    pub default_country_risk: u8,
}

impl Default for NetworkRules {
    fn default() -> Self {
        let codes = |list: &[&str]| list.iter().map(|c| c.to_string()).collect();
        Self {
            anonymizer_penalty: 40,
            suspicious_isp_penalty: 20,
            geovelocity_limit_kmh: 1000,
            geovelocity_penalty: 30,
            country_risk_limit: 70,
            country_risk_penalty: 25,
            high_risk_countries: codes(&["IR", "KP", "SY", "CU", "VE", "AF", "MM", "SD", "BY", "RU"]),
            medium_risk_countries: codes(&["NG", "PK", "UA", "VN", "ID", "PH", "KH", "BD"]),
            high_country_risk: 90,
            medium_country_risk: 60,
            default_country_risk: 10,
        }
    }
}

/// Payment sub-score rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentRules {
    /// Base risk for cards
    pub card_risk: u8,
    /// Base risk for crypto
    pub crypto_risk: u8,
    /// Base risk for bank transfers
    pub bank_transfer_risk: u8,
    /// Base risk for wallets
    pub wallet_risk: u8,
    /// Penalty when AVS fails
    pub avs_mismatch_penalty: i32,
    /// Penalty when CVV fails
    pub cvv_mismatch_penalty: i32,
    /// Penalty for prepaid BINs
    pub prepaid_penalty: i32,
    /// Penalty when the BIN country differs from the IP country
    pub bin_country_mismatch_penalty: i32,
}

impl Default for PaymentRules {
    fn default() -> Self {
        Self {
            card_risk: 20,
            crypto_risk: 45,
            bank_transfer_risk: 15,
            wallet_risk: 25,
            avs_mismatch_penalty: 15,
            cvv_mismatch_penalty: 25,
            prepaid_penalty: 10,
            bin_country_mismatch_penalty: 15,
        }
    }
}

/// Behavioral sub-score rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehavioralRules {
    /// Starting point
    pub neutral_score: i32,
    /// Account age (days) counted as established
    pub established_age_days: u32,
    /// Bonus for established accounts
    pub established_bonus: i32,
    /// Account age (days) counted as maturing
    pub maturing_age_days: u32,
    /// Bonus for maturing accounts
    pub maturing_bonus: i32,
    /// Account age (days) below which the account is new
    pub new_account_days: u32,
    /// Penalty for new accounts
    pub new_account_penalty: i32,
    /// Refund rate (percent) above which the heavy penalty applies
    pub high_refund_rate_pct: u8,
    /// Heavy refund penalty
    pub high_refund_penalty: i32,
    /// Refund rate (percent) above which the light penalty applies
    pub elevated_refund_rate_pct: u8,
    /// Light refund penalty
    pub elevated_refund_penalty: i32,
    /// Refund rate (percent) below which the bonus applies
    pub low_refund_rate_pct: u8,
    /// Bonus for a clean refund history
    pub low_refund_bonus: i32,
    /// Spending consistency above which the bonus applies
    pub consistent_spending: u8,
    /// Bonus for consistent spending
    pub consistent_spending_bonus: i32,
    /// Spending consistency below which the penalty applies
    pub erratic_spending: u8,
    /// Penalty for erratic spending
    pub erratic_spending_penalty: i32,
    /// Velocity score above which the penalty applies
    pub velocity_limit: u8,
    /// Penalty for high purchase velocity
    pub velocity_penalty: i32,
    /// Tenure (days) earning the tenure bonus
    pub tenure_days: u32,
    /// Tenure bonus
    pub tenure_bonus: i32,
}

impl Default for BehavioralRules {
    fn default() -> Self {
        Self {
            neutral_score: 50,
            established_age_days: 365,
            established_bonus: 20,
            maturing_age_days: 90,
            maturing_bonus: 10,
            new_account_days: 7,
            new_account_penalty: 20,
            high_refund_rate_pct: 20,
            high_refund_penalty: 30,
            elevated_refund_rate_pct: 10,
            elevated_refund_penalty: 15,
            low_refund_rate_pct: 5,
            low_refund_bonus: 10,
            consistent_spending: 70,
            consistent_spending_bonus: 10,
            erratic_spending: 30,
            erratic_spending_penalty: 10,
            velocity_limit: 70,
            velocity_penalty: 20,
            tenure_days: 180,
            tenure_bonus: 5,
        }
    }
}

/// Platform sub-score rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformRules {
    /// Score for low-risk platforms
    pub low_risk_score: i32,
    /// Score for medium-risk platforms
    pub medium_risk_score: i32,
    /// Score for high-risk platforms
    pub high_risk_score: i32,
    /// Penalty for creators in their first weeks
    pub new_creator_penalty: i32,
    /// Bonus for verified/top creators
    pub trusted_creator_bonus: i32,
    /// Penalty for adult content
    pub adult_content_penalty: i32,
    /// Risk level per client platform when the creator profile has none
    pub platform_risk: BTreeMap<String, PlatformRiskLevel>,
}

impl Default for PlatformRules {
    fn default() -> Self {
        let mut platform_risk = BTreeMap::new();
        platform_risk.insert("web".to_string(), PlatformRiskLevel::Low);
        platform_risk.insert("ios".to_string(), PlatformRiskLevel::Low);
        platform_risk.insert("android".to_string(), PlatformRiskLevel::Medium);
        platform_risk.insert("api".to_string(), PlatformRiskLevel::High);
        Self {
            low_risk_score: 100,
            medium_risk_score: 60,
            high_risk_score: 25,
            new_creator_penalty: 10,
            trusted_creator_bonus: 5,
            adult_content_penalty: 5,
            platform_risk,
        }
    }
}

/// Confidence increments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceRules {
    /// Starting confidence
    pub base: i32,
    /// Processor corroborated the payment
    pub cross_reference_bonus: i32,
    /// Device fingerprint present
    pub fingerprint_bonus: i32,
    /// IP data present
    pub ip_bonus: i32,
    /// Behavioral history present
    pub history_bonus: i32,
    /// Ceiling
    pub cap: u8,
}

impl Default for ConfidenceRules {
    fn default() -> Self {
        Self {
            base: 50,
            cross_reference_bonus: 30,
            fingerprint_bonus: 10,
            ip_bonus: 10,
            history_bonus: 10,
            cap: crate::types::MAX_CONFIDENCE,
        }
    }
}

/// Verification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    /// Minimum score for `verified`
    pub auto_approve_score: u8,
    /// Minimum confidence for `verified`
    pub auto_approve_confidence: u8,
    /// Scores below this are `rejected`
    pub reject_score: u8,
    /// Confidence below this is `rejected`
    pub reject_confidence: u8,
    /// Risk factors that force `rejected` whatever the score
    pub critical_factors: Vec<String>,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            auto_approve_score: 80,
            auto_approve_confidence: 70,
            reject_score: 40,
            reject_confidence: 30,
            critical_factors: vec!["tor_vpn_detected".to_string(), "malicious_ip".to_string()],
        }
    }
}

/// Refund policy constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefundPolicyConfig {
    /// Window after purchase in which refunds can be auto-approved
    pub instant_window_secs: i64,
    /// Minimum trust score for auto-approval
    pub auto_approve_score: u8,
    /// Refund rate (percent) that must not be reached for auto-approval
    pub approve_max_refund_rate_pct: u8,
    /// Trust score below which refunds are auto-rejected
    pub reject_score: u8,
    /// Refund rate (percent) above which refunds are auto-rejected
    pub reject_refund_rate_pct: u8,
    /// Refunds per 24h above which refunds are auto-rejected
    pub daily_refund_cap: u32,
    /// Review SLA for queued refunds
    pub review_sla_secs: i64,
    /// Reported viewing time above which content counts as accessed
    pub access_grace_secs: u64,
}

impl Default for RefundPolicyConfig {
    fn default() -> Self {
        Self {
            instant_window_secs: 3600,
            auto_approve_score: 80,
            approve_max_refund_rate_pct: 10,
            reject_score: 40,
            reject_refund_rate_pct: 50,
            daily_refund_cap: 3,
            review_sla_secs: 4 * 3600,
            access_grace_secs: 0,
        }
    }
}

/// Call budgets in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-collector budget
    pub collector_ms: u64,
    /// Per-adapter budget
    pub adapter_ms: u64,
    /// Whole-request budget
    pub overall_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            collector_ms: 1500,
            adapter_ms: 2000,
            overall_ms: 5000,
        }
    }
}

/// Fee schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Processing rate per processor
    pub processor_rates: BTreeMap<String, Decimal>,
    /// Rate charged when the processor is not in the table
    pub default_processor_rate: Decimal,
    /// Platform commission
    pub platform_rate: Decimal,
    /// ISO 4217 codes the platform settles in
    pub supported_currencies: Vec<String>,
    /// Business days to settle a completed payment
    pub completed_settlement_days: u32,
    /// Business days to settle anything else
    pub pending_settlement_days: u32,
}

impl Default for FeeConfig {
    fn default() -> Self {
        let rate = |s: &str| Decimal::from_str(s).unwrap_or(Decimal::ZERO);
        let mut processor_rates = BTreeMap::new();
        processor_rates.insert("stripe".to_string(), rate("0.029"));
        processor_rates.insert("ccbill".to_string(), rate("0.105"));
        processor_rates.insert("segpay".to_string(), rate("0.095"));
        processor_rates.insert("coinbase".to_string(), rate("0.01"));
        processor_rates.insert("wise".to_string(), rate("0.005"));
        Self {
            processor_rates,
            default_processor_rate: rate("0.035"),
            platform_rate: rate("0.20"),
            supported_currencies: ["USD", "EUR", "GBP", "CAD", "AUD", "JPY"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            completed_settlement_days: 2,
            pending_settlement_days: 5,
        }
    }
}

/// Routing defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Processor used when no rule matches
    pub default_processor: String,
    /// Merchant account used when no rule matches
    pub default_merchant_id: String,
    /// Poll interval for rule reloads
    pub refresh_interval_secs: u64,
    /// TOML file holding routing rules
    pub rules_path: Option<PathBuf>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_processor: "stripe".to_string(),
            default_merchant_id: "fv-default".to_string(),
            refresh_interval_secs: 30,
            rules_path: None,
        }
    }
}

impl EngineConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = EngineConfig::default();

        if let Ok(processor) = std::env::var("TRUST_DEFAULT_PROCESSOR") {
            config.routing.default_processor = processor;
        }

        if let Ok(path) = std::env::var("TRUST_ROUTING_RULES_PATH") {
            config.routing.rules_path = Some(PathBuf::from(path));
        }

        if let Some(ms) = env_parse("TRUST_OVERALL_TIMEOUT_MS")? {
            config.timeouts.overall_ms = ms;
        }

        if let Some(ttl) = env_parse("TRUST_CACHE_TTL_SECONDS")? {
            config.cache_ttl_seconds = ttl;
        }

        if let Some(score) = env_parse("TRUST_AUTO_APPROVE_SCORE")? {
            config.decision.auto_approve_score = score;
        }

        if let Some(secs) = env_parse("TRUST_REFUND_WINDOW_SECS")? {
            config.refund.instant_window_secs = secs;
        }

        if let Some(secs) = env_parse("TRUST_REVIEW_SLA_SECS")? {
            config.refund.review_sla_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Cache TTL actually applied
    pub fn effective_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_seconds.min(MAX_CACHE_TTL_SECONDS))
    }

    /// Reject configurations that cannot produce sound decisions
    pub fn validate(&self) -> Result<()> {
        if self.weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config(
                "score weights must be finite and non-negative".to_string(),
            ));
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 0.001 {
            return Err(Error::Config(format!(
                "score weights must sum to 1.0, got {:.3}",
                sum
            )));
        }

        let d = &self.decision;
        if d.reject_score >= d.auto_approve_score || d.auto_approve_score > 100 {
            return Err(Error::Config(format!(
                "reject score {} must be below auto-approve score {} (max 100)",
                d.reject_score, d.auto_approve_score
            )));
        }
        if d.reject_confidence > d.auto_approve_confidence {
            return Err(Error::Config(
                "reject confidence must not exceed auto-approve confidence".to_string(),
            ));
        }

        let r = &self.refund;
        if r.reject_score >= r.auto_approve_score {
            return Err(Error::Config(
                "refund reject score must be below refund auto-approve score".to_string(),
            ));
        }
        if r.instant_window_secs < 0 || r.review_sla_secs <= 0 {
            return Err(Error::Config(
                "refund window and review SLA must be positive".to_string(),
            ));
        }

        let t = &self.timeouts;
        if t.collector_ms == 0 || t.adapter_ms == 0 || t.overall_ms == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }

        if self.routing.default_processor.trim().is_empty() {
            return Err(Error::Config("default processor is required".to_string()));
        }

        let unit = Decimal::ONE;
        let bad_rate = self
            .fees
            .processor_rates
            .iter()
            .find(|(_, rate)| **rate < Decimal::ZERO || **rate > unit);
        if let Some((processor, rate)) = bad_rate {
            return Err(Error::Config(format!(
                "processor rate for {} out of range: {}",
                processor, rate
            )));
        }
        if self.fees.platform_rate < Decimal::ZERO || self.fees.platform_rate > unit {
            return Err(Error::Config(format!(
                "platform rate out of range: {}",
                self.fees.platform_rate
            )));
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}
