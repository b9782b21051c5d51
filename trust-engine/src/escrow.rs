//! Escrow holder replacement
//!
//! When a higher offer displaces the current holder of an escrowed item, the
//! previous holder must be refunded exactly once before the new holder is
//! recorded. Each item is guarded by its own lock so replacements on one
//! item are serialised while different items proceed in parallel.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Funds held in escrow for an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowHolding {
    /// Item (auction lot, drop) the funds are held for
    pub item_id: String,
    /// Current holder
    pub holder: String,
    /// Amount held
    pub amount: Decimal,
    /// ISO 4217 currency
    pub currency: String,
    /// When the holder took the position
    pub since: DateTime<Utc>,
}

/// Refund owed to a displaced holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensatingRefund {
    /// Refund ID, unique per displacement
    pub refund_id: Uuid,
    /// Item
    pub item_id: String,
    /// Displaced holder
    pub holder: String,
    /// Amount returned
    pub amount: Decimal,
    /// ISO 4217 currency
    pub currency: String,
    /// When the refund was issued
    pub issued_at: DateTime<Utc>,
}

/// Where compensating refunds are sent
#[async_trait]
pub trait CompensationSink: Send + Sync {
    /// Issue the refund; an error leaves the escrow untouched
    async fn issue_refund(&self, refund: &CompensatingRefund) -> Result<()>;
}

/// Result of a holder change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderChange {
    /// First holder for the item
    Placed(EscrowHolding),
    /// Previous holder displaced and refunded
    Replaced {
        /// New holding
        holding: EscrowHolding,
        /// Refund issued to the previous holder
        refund: CompensatingRefund,
    },
}

/// Escrow positions by item
pub struct EscrowBook {
    items: DashMap<String, Arc<Mutex<Option<EscrowHolding>>>>,
    sink: Arc<dyn CompensationSink>,
}

impl EscrowBook {
    /// Create new escrow book
    pub fn new(sink: Arc<dyn CompensationSink>) -> Self {
        Self {
            items: DashMap::new(),
            sink,
        }
    }

    fn slot(&self, item_id: &str) -> Arc<Mutex<Option<EscrowHolding>>> {
        self.items
            .entry(item_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Current holding for an item
    pub async fn holding(&self, item_id: &str) -> Option<EscrowHolding> {
        let slot = self.items.get(item_id).map(|s| s.clone())?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Record `holder` at `amount`, refunding whoever held the item before.
    ///
    /// The new amount must exceed the current one and use the same
    /// currency. If the refund cannot be issued the previous holder stays.
    pub async fn replace_holder(
        &self,
        item_id: &str,
        holder: &str,
        amount: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<HolderChange> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "escrow amount must be positive, got {}",
                amount
            )));
        }

        let slot = self.slot(item_id);
        let mut current = slot.lock().await;

        let holding = EscrowHolding {
            item_id: item_id.to_string(),
            holder: holder.to_string(),
            amount,
            currency: currency.to_uppercase(),
            since: at,
        };

        let previous = match current.as_ref() {
            None => {
                *current = Some(holding.clone());
                info!("Escrow {} placed by {} for {} {}", item_id, holder, amount, holding.currency);
                return Ok(HolderChange::Placed(holding));
            }
            Some(previous) => previous.clone(),
        };

        if !previous.currency.eq_ignore_ascii_case(currency) {
            return Err(Error::InvalidRequest(format!(
                "escrow {} is held in {}, offer is in {}",
                item_id, previous.currency, currency
            )));
        }
        if amount <= previous.amount {
            return Err(Error::InvalidRequest(format!(
                "offer {} does not exceed current {} for {}",
                amount, previous.amount, item_id
            )));
        }

        let refund = CompensatingRefund {
            refund_id: Uuid::now_v7(),
            item_id: item_id.to_string(),
            holder: previous.holder.clone(),
            amount: previous.amount,
            currency: previous.currency.clone(),
            issued_at: at,
        };

        // Refund first; only a successful refund lets the new holder in
        self.sink.issue_refund(&refund).await?;
        *current = Some(holding.clone());

        info!(
            "Escrow {} moved from {} to {} ({} {} refunded)",
            item_id, previous.holder, holder, previous.amount, previous.currency
        );
        Ok(HolderChange::Replaced { holding, refund })
    }

    /// Close an item and hand back its final holding
    pub async fn release(&self, item_id: &str) -> Option<EscrowHolding> {
        let (_, slot) = self.items.remove(item_id)?;
        let mut guard = slot.lock().await;
        guard.take()
    }
}
