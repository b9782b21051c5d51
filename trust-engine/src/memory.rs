//! In-memory signal sources
//!
//! One store implements every collector capability so tests and demos can
//! seed deterministic evidence. Taking it offline makes every lookup fail
//! with an infrastructure error.

use crate::config::EngineConfig;
use crate::signals::{
    BehavioralCollector, CardCheckReport, CardChecks, CreatorDirectory, CreatorProfile,
    DeviceCollector, DeviceIntelligence, DeviceProfile, FanHistory, FanHistorySource,
    IpIntelligence, IpReport, NetworkCollector, PaymentCollector, PlatformCollector, Sighting,
    SightingHistory, SignalCollectors,
};
use crate::velocity::VelocityTracker;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// In-memory implementation of every signal capability
#[derive(Default)]
pub struct InMemorySignalStore {
    devices: DashMap<String, DeviceProfile>,
    device_activity: VelocityTracker,
    ips: DashMap<String, IpReport>,
    // Map: fan_id -> sightings, oldest first
    sightings: DashMap<String, Vec<Sighting>>,
    // Map: (fan_id, last4) -> report
    cards: DashMap<(String, String), CardCheckReport>,
    fans: DashMap<String, FanHistory>,
    creators: DashMap<String, CreatorProfile>,
    // (fan_id, creator_id, transaction or None for any purchase)
    accessed: DashSet<(String, String, Option<Uuid>)>,
    offline: AtomicBool,
}

impl InMemorySignalStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every lookup fail with an infrastructure error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::Infrastructure("signal store unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Seed a device profile
    pub fn put_device(&self, fingerprint: &str, profile: DeviceProfile) {
        self.devices.insert(fingerprint.to_string(), profile);
    }

    /// Record a transaction from a device
    pub fn record_device_activity(&self, fingerprint: &str, at: DateTime<Utc>) {
        self.device_activity.record(fingerprint, at);
    }

    /// Seed an IP report
    pub fn put_ip(&self, ip: &str, report: IpReport) {
        self.ips.insert(ip.to_string(), report);
    }

    /// Record where a fan was seen
    pub fn record_sighting(&self, fan_id: &str, sighting: Sighting) {
        let mut entry = self.sightings.entry(fan_id.to_string()).or_default();
        let list = entry.value_mut();
        let pos = list.partition_point(|s| s.seen_at <= sighting.seen_at);
        list.insert(pos, sighting);
    }

    /// Seed card check results
    pub fn put_card_report(&self, fan_id: &str, card_last4: &str, report: CardCheckReport) {
        self.cards
            .insert((fan_id.to_string(), card_last4.to_string()), report);
    }

    /// Seed a fan's purchase history
    pub fn put_fan_history(&self, fan_id: &str, history: FanHistory) {
        self.fans.insert(fan_id.to_string(), history);
    }

    /// Seed a creator profile
    pub fn put_creator(&self, creator_id: &str, profile: CreatorProfile) {
        self.creators.insert(creator_id.to_string(), profile);
    }

    /// Mark content as opened; `None` covers every purchase from the creator
    pub fn mark_content_accessed(&self, fan_id: &str, creator_id: &str, transaction_id: Option<Uuid>) {
        self.accessed
            .insert((fan_id.to_string(), creator_id.to_string(), transaction_id));
    }

    /// Uncached collectors over this store
    pub fn collectors(self: &Arc<Self>, config: &EngineConfig) -> SignalCollectors {
        let (device, network, payment, behavioral, platform) = self.build(config);
        SignalCollectors {
            device: Arc::new(device),
            network: Arc::new(network),
            payment: Arc::new(payment),
            behavioral: Arc::new(behavioral),
            platform: Arc::new(platform),
        }
    }

    /// Collectors over this store behind the configured signal cache
    pub fn cached_collectors(self: &Arc<Self>, config: &EngineConfig) -> SignalCollectors {
        let (device, network, payment, behavioral, platform) = self.build(config);
        SignalCollectors::cached(
            device,
            network,
            payment,
            behavioral,
            platform,
            config.effective_cache_ttl(),
        )
    }

    fn build(
        self: &Arc<Self>,
        config: &EngineConfig,
    ) -> (
        DeviceCollector,
        NetworkCollector,
        PaymentCollector,
        BehavioralCollector,
        PlatformCollector,
    ) {
        (
            DeviceCollector::new(self.clone()),
            NetworkCollector::new(self.clone(), self.clone(), config.network.clone()),
            PaymentCollector::new(self.clone(), config.payment.clone()),
            BehavioralCollector::new(self.clone()),
            PlatformCollector::new(self.clone(), config.platform.platform_risk.clone()),
        )
    }
}

#[async_trait]
impl DeviceIntelligence for InMemorySignalStore {
    async fn device_profile(&self, fingerprint: &str) -> Result<Option<DeviceProfile>> {
        self.check_online()?;
        Ok(self.devices.get(fingerprint).map(|p| p.clone()))
    }

    async fn hourly_velocity(&self, fingerprint: &str, as_of: DateTime<Utc>) -> Result<u32> {
        self.check_online()?;
        Ok(self.device_activity.count(fingerprint, as_of))
    }
}

#[async_trait]
impl IpIntelligence for InMemorySignalStore {
    async fn lookup_reputation(&self, ip: &str) -> Result<Option<IpReport>> {
        self.check_online()?;
        Ok(self.ips.get(ip).map(|r| r.clone()))
    }
}

#[async_trait]
impl SightingHistory for InMemorySignalStore {
    async fn last_sighting(&self, fan_id: &str, before: DateTime<Utc>) -> Result<Option<Sighting>> {
        self.check_online()?;
        Ok(self.sightings.get(fan_id).and_then(|list| {
            list.iter().rev().find(|s| s.seen_at < before).copied()
        }))
    }
}

#[async_trait]
impl CardChecks for InMemorySignalStore {
    async fn card_checks(&self, fan_id: &str, card_last4: &str) -> Result<Option<CardCheckReport>> {
        self.check_online()?;
        Ok(self
            .cards
            .get(&(fan_id.to_string(), card_last4.to_string()))
            .map(|r| r.clone()))
    }
}

#[async_trait]
impl FanHistorySource for InMemorySignalStore {
    async fn fan_history(&self, fan_id: &str) -> Result<Option<FanHistory>> {
        self.check_online()?;
        Ok(self.fans.get(fan_id).map(|h| h.clone()))
    }
}

#[async_trait]
impl CreatorDirectory for InMemorySignalStore {
    async fn creator_profile(&self, creator_id: &str) -> Result<Option<CreatorProfile>> {
        self.check_online()?;
        Ok(self.creators.get(creator_id).map(|p| p.clone()))
    }

    async fn content_accessed(
        &self,
        fan_id: &str,
        creator_id: &str,
        transaction_id: Option<Uuid>,
    ) -> Result<bool> {
        self.check_online()?;
        let key = |tx: Option<Uuid>| (fan_id.to_string(), creator_id.to_string(), tx);
        Ok(self.accessed.contains(&key(None))
            || (transaction_id.is_some() && self.accessed.contains(&key(transaction_id))))
    }
}
