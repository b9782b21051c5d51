//! Network signal collector

use super::{NetworkSignals, SignalCollector, SignalKind};
use crate::config::NetworkRules;
use crate::types::VerificationRequest;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude, degrees
    pub latitude: f64,
    /// Longitude, degrees
    pub longitude: f64,
}

impl GeoPoint {
    /// Great-circle distance in kilometres
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Reputation report for an IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpReport {
    /// 0-100, higher is better
    pub reputation: u8,
    /// Tor exit, VPN or open proxy
    pub is_anonymizer: bool,
    /// Hosting or bulletproof ISP
    pub is_suspicious_isp: bool,
    /// Listed on a malicious-IP feed
    pub known_malicious: bool,
    /// ISO 3166 alpha-2 country
    pub country: Option<String>,
    /// Geolocation
    pub location: Option<GeoPoint>,
}

/// IP reputation capability
#[async_trait]
pub trait IpIntelligence: Send + Sync {
    /// Reputation for an address, `None` if the feed has no entry
    async fn lookup_reputation(&self, ip: &str) -> Result<Option<IpReport>>;
}

/// Previous location of a fan
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    /// Where
    pub location: GeoPoint,
    /// When
    pub seen_at: DateTime<Utc>,
}

/// Fan location history capability
#[async_trait]
pub trait SightingHistory: Send + Sync {
    /// Most recent sighting strictly before `before`
    async fn last_sighting(&self, fan_id: &str, before: DateTime<Utc>) -> Result<Option<Sighting>>;
}

/// Collects [`NetworkSignals`]
pub struct NetworkCollector {
    intel: Arc<dyn IpIntelligence>,
    history: Arc<dyn SightingHistory>,
    rules: NetworkRules,
}

impl NetworkCollector {
    /// Create new network collector
    pub fn new(
        intel: Arc<dyn IpIntelligence>,
        history: Arc<dyn SightingHistory>,
        rules: NetworkRules,
    ) -> Self {
        Self { intel, history, rules }
    }

    fn country_risk(&self, country: &str) -> u8 {
        let code = country.to_uppercase();
        if self.rules.high_risk_countries.iter().any(|c| *c == code) {
            self.rules.high_country_risk
        } else if self.rules.medium_risk_countries.iter().any(|c| *c == code) {
            self.rules.medium_country_risk
        } else {
            self.rules.default_country_risk
        }
    }
}

/// Implied travel speed between two sightings, km/h
fn travel_speed_kmh(from: &Sighting, to: GeoPoint, at: DateTime<Utc>) -> Option<u32> {
    let distance = from.location.distance_km(&to);
    let hours = (at - from.seen_at).num_seconds() as f64 / 3600.0;
    if hours <= 0.0 {
        return None;
    }
    // Sightings less than a minute apart are treated as a minute apart.
    let speed = distance / hours.max(1.0 / 60.0);
    Some(speed.round().min(u32::MAX as f64) as u32)
}

#[async_trait]
impl SignalCollector for NetworkCollector {
    type Signal = NetworkSignals;

    fn kind(&self) -> SignalKind {
        SignalKind::Network
    }

    fn cache_key(&self, request: &VerificationRequest) -> Option<String> {
        request
            .proof
            .ip_address
            .as_ref()
            .map(|ip| format!("network:{}:{}", request.fan_id, ip))
    }

    async fn collect(&self, request: &VerificationRequest) -> Result<NetworkSignals> {
        let ip = match &request.proof.ip_address {
            Some(ip) if !ip.is_empty() => ip,
            _ => return Ok(NetworkSignals::default()),
        };

        let report = match self.intel.lookup_reputation(ip).await? {
            Some(report) => report,
            None => {
                return Ok(NetworkSignals {
                    ip_address: Some(ip.clone()),
                    ..Default::default()
                })
            }
        };

        let geo_velocity_kmh = match report.location {
            Some(location) => {
                let at = request.proof.timestamp;
                self.history
                    .last_sighting(&request.fan_id, at)
                    .await?
                    .and_then(|previous| travel_speed_kmh(&previous, location, at))
            }
            None => None,
        };

        Ok(NetworkSignals {
            ip_address: Some(ip.clone()),
            ip_reputation: Some(report.reputation.min(100)),
            geo_velocity_kmh,
            is_anonymizer: report.is_anonymizer,
            is_suspicious_isp: report.is_suspicious_isp,
            known_malicious: report.known_malicious,
            country_risk: report.country.as_deref().map(|c| self.country_risk(c)),
            country: report.country,
        })
    }
}
