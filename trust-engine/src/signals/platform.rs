//! Platform signal collector

use super::{PlatformRiskLevel, PlatformSignals, SignalCollector, SignalKind};
use crate::types::VerificationRequest;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Creator metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorProfile {
    /// Tier (new, standard, verified, top)
    pub tier: String,
    /// Content category
    pub content_type: String,
    /// Risk tier assigned by trust & safety, if any
    pub risk_level: Option<PlatformRiskLevel>,
}

/// Creator directory capability
#[async_trait]
pub trait CreatorDirectory: Send + Sync {
    /// Profile for a creator, `None` if unknown
    async fn creator_profile(&self, creator_id: &str) -> Result<Option<CreatorProfile>>;

    /// Whether the fan opened content bought in `transaction_id`
    async fn content_accessed(
        &self,
        fan_id: &str,
        creator_id: &str,
        transaction_id: Option<Uuid>,
    ) -> Result<bool>;
}

/// Collects [`PlatformSignals`]
pub struct PlatformCollector {
    directory: Arc<dyn CreatorDirectory>,
    platform_risk: BTreeMap<String, PlatformRiskLevel>,
}

impl PlatformCollector {
    /// Create new platform collector
    pub fn new(
        directory: Arc<dyn CreatorDirectory>,
        platform_risk: BTreeMap<String, PlatformRiskLevel>,
    ) -> Self {
        Self {
            directory,
            platform_risk,
        }
    }
}

#[async_trait]
impl SignalCollector for PlatformCollector {
    type Signal = PlatformSignals;

    fn kind(&self) -> SignalKind {
        SignalKind::Platform
    }

    fn cache_key(&self, request: &VerificationRequest) -> Option<String> {
        // Content access depends on the transaction, so only cache when there is none
        match request.transaction_id {
            Some(_) => None,
            None => Some(format!(
                "platform:{}:{}:{}",
                request.creator_id, request.fan_id, request.platform
            )),
        }
    }

    async fn collect(&self, request: &VerificationRequest) -> Result<PlatformSignals> {
        let profile = self.directory.creator_profile(&request.creator_id).await?;
        let content_accessed = self
            .directory
            .content_accessed(&request.fan_id, &request.creator_id, request.transaction_id)
            .await?;

        let platform_level = self
            .platform_risk
            .get(&request.platform.to_lowercase())
            .copied();

        let signals = match profile {
            Some(profile) => PlatformSignals {
                risk_level: profile.risk_level.or(platform_level),
                content_type: Some(profile.content_type),
                creator_tier: Some(profile.tier),
                content_accessed,
            },
            None => PlatformSignals {
                risk_level: platform_level,
                content_type: None,
                creator_tier: None,
                content_accessed,
            },
        };

        Ok(signals)
    }
}
