//! Device signal collector

use super::{DeviceSignals, SignalCollector, SignalKind};
use crate::types::VerificationRequest;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a device-intelligence source knows about a fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// 0-100, higher is better
    pub reputation: u8,
    /// First sighting of this fingerprint
    pub first_seen: DateTime<Utc>,
    /// Suspicious-pattern flags
    pub flags: Vec<String>,
}

/// Device intelligence capability
#[async_trait]
pub trait DeviceIntelligence: Send + Sync {
    /// Profile for a fingerprint, `None` if never seen
    async fn device_profile(&self, fingerprint: &str) -> Result<Option<DeviceProfile>>;

    /// Transactions from the fingerprint in the hour ending at `as_of`
    async fn hourly_velocity(&self, fingerprint: &str, as_of: DateTime<Utc>) -> Result<u32>;
}

/// Collects [`DeviceSignals`]
pub struct DeviceCollector {
    intel: Arc<dyn DeviceIntelligence>,
    new_device_window: Duration,
}

impl DeviceCollector {
    /// Create new device collector
    pub fn new(intel: Arc<dyn DeviceIntelligence>) -> Self {
        Self {
            intel,
            new_device_window: Duration::hours(24),
        }
    }
}

#[async_trait]
impl SignalCollector for DeviceCollector {
    type Signal = DeviceSignals;

    fn kind(&self) -> SignalKind {
        SignalKind::Device
    }

    fn cache_key(&self, request: &VerificationRequest) -> Option<String> {
        request
            .proof
            .device_fingerprint
            .as_ref()
            .map(|fp| format!("device:{}", fp))
    }

    async fn collect(&self, request: &VerificationRequest) -> Result<DeviceSignals> {
        let fingerprint = match &request.proof.device_fingerprint {
            Some(fp) if !fp.is_empty() => fp,
            // No fingerprint: nothing to look up, score stays neutral
            _ => return Ok(DeviceSignals::default()),
        };
        let as_of = request.proof.timestamp;

        let profile = self.intel.device_profile(fingerprint).await?;
        let velocity = self.intel.hourly_velocity(fingerprint, as_of).await?;

        let signals = match profile {
            Some(profile) => DeviceSignals {
                fingerprint: Some(fingerprint.clone()),
                reputation: Some(profile.reputation.min(100)),
                velocity_per_hour: Some(velocity),
                is_new: as_of - profile.first_seen < self.new_device_window,
                flags: profile.flags,
            },
            None => DeviceSignals {
                fingerprint: Some(fingerprint.clone()),
                reputation: None,
                velocity_per_hour: Some(velocity),
                is_new: true,
                flags: Vec::new(),
            },
        };

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySignalStore;
    use crate::signals::test_support::request;

    #[tokio::test]
    async fn test_known_device() {
        let store = Arc::new(InMemorySignalStore::new());
        let req = request();
        let at = req.proof.timestamp;
        store.put_device(
            "fp-abc",
            DeviceProfile {
                reputation: 88,
                first_seen: at - Duration::days(90),
                flags: vec!["emulator".to_string()],
            },
        );
        for i in 0..3 {
            store.record_device_activity("fp-abc", at - Duration::minutes(10 * i));
        }

        let signals = DeviceCollector::new(store).collect(&req).await.unwrap();
        assert_eq!(signals.reputation, Some(88));
        assert_eq!(signals.velocity_per_hour, Some(3));
        assert!(!signals.is_new);
        assert_eq!(signals.flags, vec!["emulator".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_device_is_new() {
        let store = Arc::new(InMemorySignalStore::new());
        let signals = DeviceCollector::new(store).collect(&request()).await.unwrap();
        assert!(signals.is_new);
        assert_eq!(signals.reputation, None);
    }

    #[tokio::test]
    async fn test_missing_fingerprint_is_neutral() {
        let store = Arc::new(InMemorySignalStore::new());
        let mut req = request();
        req.proof.device_fingerprint = None;

        let collector = DeviceCollector::new(store);
        assert_eq!(collector.cache_key(&req), None);
        assert_eq!(collector.collect(&req).await.unwrap(), DeviceSignals::default());
    }
}
