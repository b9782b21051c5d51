//! Risk signal collection
//!
//! Five independent collectors (device, network, payment, behavioral,
//! platform) run concurrently for every request. A collector that errors or
//! overruns its budget is replaced by its neutral default and reported in
//! [`RiskSignals::unavailable`]; only infrastructure failures abort the
//! request.

pub mod behavioral;
pub mod cache;
pub mod device;
pub mod network;
pub mod payment;
pub mod platform;

use crate::metrics::COLLECTOR_DEGRADED_TOTAL;
use crate::types::{PaymentMethodKind, VerificationRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use behavioral::{BehavioralCollector, FanHistory, FanHistorySource};
pub use cache::CachedCollector;
pub use device::{DeviceCollector, DeviceIntelligence, DeviceProfile};
pub use network::{GeoPoint, IpIntelligence, IpReport, NetworkCollector, Sighting, SightingHistory};
pub use payment::{CardCheckReport, CardChecks, PaymentCollector};
pub use platform::{CreatorDirectory, CreatorProfile, PlatformCollector};

/// Score used for any sub-score whose data is missing
pub const NEUTRAL_SCORE: u8 = 50;

/// Signal family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Device fingerprint and reputation
    Device,
    /// IP and geography
    Network,
    /// Payment instrument
    Payment,
    /// Fan purchase history
    Behavioral,
    /// Creator and client platform
    Platform,
}

impl SignalKind {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Device => "device",
            SignalKind::Network => "network",
            SignalKind::Payment => "payment",
            SignalKind::Behavioral => "behavioral",
            SignalKind::Platform => "platform",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceSignals {
    /// Fingerprint the evidence belongs to
    pub fingerprint: Option<String>,
    /// 0-100, higher is better
    pub reputation: Option<u8>,
    /// Transactions from this device in the trailing hour
    pub velocity_per_hour: Option<u32>,
    /// First seen within the last day
    pub is_new: bool,
    /// Suspicious-pattern flags (emulator, rooted, spoofed_user_agent, ...)
    pub flags: Vec<String>,
}

/// Network evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkSignals {
    /// Address the evidence belongs to
    pub ip_address: Option<String>,
    /// 0-100, higher is better
    pub ip_reputation: Option<u8>,
    /// Implied travel speed since the fan's previous sighting (km/h)
    pub geo_velocity_kmh: Option<u32>,
    /// Tor, VPN or open proxy
    pub is_anonymizer: bool,
    /// Hosting or bulletproof ISP
    pub is_suspicious_isp: bool,
    /// Listed on a malicious-IP feed
    pub known_malicious: bool,
    /// ISO 3166 alpha-2 country
    pub country: Option<String>,
    /// 0-100, higher is riskier
    pub country_risk: Option<u8>,
}

/// Payment instrument evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaymentSignals {
    /// Method the evidence belongs to
    pub method: Option<PaymentMethodKind>,
    /// 0-100, higher is riskier
    pub risk_score: Option<u8>,
    /// Address verification outcome
    pub avs_match: Option<bool>,
    /// Card security code outcome
    pub cvv_match: Option<bool>,
    /// Issuing country from the BIN
    pub bin_country: Option<String>,
    /// Prepaid BIN
    pub is_prepaid: Option<bool>,
}

/// Fan history evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BehavioralSignals {
    /// Days since the fan registered
    pub account_age_days: Option<u32>,
    /// 0-100, how regular the fan's spend amounts are
    pub spending_consistency: Option<u8>,
    /// Refunds as a share of purchases, percent
    pub refund_rate_pct: Option<u8>,
    /// 0-100, purchase burstiness over the trailing day
    pub velocity_score: Option<u8>,
    /// Days since the fan's first purchase
    pub platform_tenure_days: Option<u32>,
    /// Refunds in the trailing 24 hours
    pub refunds_last_24h: Option<u32>,
}

/// Platform risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRiskLevel {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
}

/// Creator and platform evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlatformSignals {
    /// Risk tier
    pub risk_level: Option<PlatformRiskLevel>,
    /// Creator content category
    pub content_type: Option<String>,
    /// Creator tier (new, standard, verified, top)
    pub creator_tier: Option<String>,
    /// Fan already opened the purchased content
    pub content_accessed: bool,
}

/// All signal bundles for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RiskSignals {
    /// Device
    pub device: DeviceSignals,
    /// Network
    pub network: NetworkSignals,
    /// Payment
    pub payment: PaymentSignals,
    /// Behavioral
    pub behavioral: BehavioralSignals,
    /// Platform
    pub platform: PlatformSignals,
    /// Collectors that returned `data_unavailable`
    pub unavailable: Vec<SignalKind>,
}

impl RiskSignals {
    /// Whether the collector for `kind` produced real data
    pub fn is_available(&self, kind: SignalKind) -> bool {
        !self.unavailable.contains(&kind)
    }
}

/// A single signal source
#[async_trait]
pub trait SignalCollector: Send + Sync {
    /// Bundle this collector produces; `Default` is the neutral fallback
    type Signal: Clone + Default + Send + Sync + 'static;

    /// Signal family
    fn kind(&self) -> SignalKind;

    /// Subject key for caching; `None` disables caching for this request
    fn cache_key(&self, request: &VerificationRequest) -> Option<String>;

    /// Gather evidence for the request
    async fn collect(&self, request: &VerificationRequest) -> Result<Self::Signal>;
}

/// Outcome of one guarded collector call
enum Slot<T> {
    Ready(T),
    Degraded,
    Fatal(Error),
}

/// The five collectors, invoked together
#[derive(Clone)]
pub struct SignalCollectors {
    /// Device collector
    pub device: Arc<dyn SignalCollector<Signal = DeviceSignals>>,
    /// Network collector
    pub network: Arc<dyn SignalCollector<Signal = NetworkSignals>>,
    /// Payment collector
    pub payment: Arc<dyn SignalCollector<Signal = PaymentSignals>>,
    /// Behavioral collector
    pub behavioral: Arc<dyn SignalCollector<Signal = BehavioralSignals>>,
    /// Platform collector
    pub platform: Arc<dyn SignalCollector<Signal = PlatformSignals>>,
}

impl SignalCollectors {
    /// Wrap each collector in a [`CachedCollector`] with the same TTL
    pub fn cached(
        device: DeviceCollector,
        network: NetworkCollector,
        payment: PaymentCollector,
        behavioral: BehavioralCollector,
        platform: PlatformCollector,
        ttl: Duration,
    ) -> Self {
        Self {
            device: Arc::new(CachedCollector::new(device, ttl)),
            network: Arc::new(CachedCollector::new(network, ttl)),
            payment: Arc::new(CachedCollector::new(payment, ttl)),
            behavioral: Arc::new(CachedCollector::new(behavioral, ttl)),
            platform: Arc::new(CachedCollector::new(platform, ttl)),
        }
    }

    /// Run all collectors concurrently, each under `budget`.
    ///
    /// Never fails on partial data; returns `Err` only when a collector
    /// reports an infrastructure failure.
    pub async fn collect_all(
        &self,
        request: &VerificationRequest,
        budget: Duration,
    ) -> Result<RiskSignals> {
        let (device, network, payment, behavioral, platform) = tokio::join!(
            guarded(self.device.as_ref(), request, budget),
            guarded(self.network.as_ref(), request, budget),
            guarded(self.payment.as_ref(), request, budget),
            guarded(self.behavioral.as_ref(), request, budget),
            guarded(self.platform.as_ref(), request, budget),
        );

        let mut signals = RiskSignals::default();
        signals.device = settle(device, SignalKind::Device, &mut signals.unavailable)?;
        signals.network = settle(network, SignalKind::Network, &mut signals.unavailable)?;
        signals.payment = settle(payment, SignalKind::Payment, &mut signals.unavailable)?;
        signals.behavioral = settle(behavioral, SignalKind::Behavioral, &mut signals.unavailable)?;
        signals.platform = settle(platform, SignalKind::Platform, &mut signals.unavailable)?;

        debug!(
            "Collected signals for fan {} ({} unavailable)",
            request.fan_id,
            signals.unavailable.len()
        );

        Ok(signals)
    }
}

async fn guarded<T>(
    collector: &dyn SignalCollector<Signal = T>,
    request: &VerificationRequest,
    budget: Duration,
) -> Slot<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    let kind = collector.kind();
    match tokio::time::timeout(budget, collector.collect(request)).await {
        Ok(Ok(signal)) => Slot::Ready(signal),
        Ok(Err(e)) if e.is_infrastructure() => Slot::Fatal(e),
        Ok(Err(e)) => {
            warn!("{} collector degraded for fan {}: {}", kind, request.fan_id, e);
            COLLECTOR_DEGRADED_TOTAL.with_label_values(&[kind.as_str()]).inc();
            Slot::Degraded
        }
        Err(_) => {
            warn!(
                "{} collector exceeded {}ms for fan {}",
                kind,
                budget.as_millis(),
                request.fan_id
            );
            COLLECTOR_DEGRADED_TOTAL.with_label_values(&[kind.as_str()]).inc();
            Slot::Degraded
        }
    }
}

fn settle<T: Default>(slot: Slot<T>, kind: SignalKind, unavailable: &mut Vec<SignalKind>) -> Result<T> {
    match slot {
        Slot::Ready(signal) => Ok(signal),
        Slot::Degraded => {
            unavailable.push(kind);
            Ok(T::default())
        }
        Slot::Fatal(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::TransactionProof;
    use chrono::{TimeZone, Utc};

    pub fn request() -> VerificationRequest {
        VerificationRequest {
            fan_id: "fan-42".to_string(),
            creator_id: "creator-7".to_string(),
            transaction_id: None,
            payment_method: PaymentMethodKind::Card,
            platform: "web".to_string(),
            proof: TransactionProof {
                email: "fan42@example.com".to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
                transaction_ref: Some("ch_123".to_string()),
                card_last4: Some("4242".to_string()),
                device_fingerprint: Some("fp-abc".to_string()),
                ip_address: Some("203.0.113.9".to_string()),
                amount: None,
            },
        }
    }

    /// Collector returning a fixed value, an error, or hanging
    pub enum Fixed<T> {
        Value(T),
        Fail(fn() -> Error),
        Hang,
    }

    pub struct FixedCollector<T> {
        pub kind: SignalKind,
        pub behaviour: Fixed<T>,
    }

    #[async_trait]
    impl<T: Clone + Default + Send + Sync + 'static> SignalCollector for FixedCollector<T> {
        type Signal = T;

        fn kind(&self) -> SignalKind {
            self.kind
        }

        fn cache_key(&self, request: &VerificationRequest) -> Option<String> {
            Some(request.fan_id.clone())
        }

        async fn collect(&self, _request: &VerificationRequest) -> Result<T> {
            match &self.behaviour {
                Fixed::Value(v) => Ok(v.clone()),
                Fixed::Fail(make) => Err(make()),
                Fixed::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(T::default())
                }
            }
        }
    }

    pub fn fixed<T: Clone + Default + Send + Sync + 'static>(
        kind: SignalKind,
        behaviour: Fixed<T>,
    ) -> Arc<FixedCollector<T>> {
        Arc::new(FixedCollector { kind, behaviour })
    }
}
