//! Persistence seams and in-memory implementations
//!
//! The engine reaches storage only through these traits. The in-memory
//! versions back tests and the replay tool; production deployments plug in
//! their own row store.

use crate::audit::AuditRecord;
use crate::refund::{RefundEntry, ReviewTicket};
use crate::types::Transaction;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Append-only audit log
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record; an existing id is an error, never an overwrite
    async fn store_audit_record(&self, record: AuditRecord) -> Result<()>;

    /// Fetch a record by verification id
    async fn audit_record(&self, verification_id: Uuid) -> Result<Option<AuditRecord>>;
}

/// Transaction rows
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction
    async fn store_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Overwrite an existing transaction
    async fn update_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Fetch a transaction
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
}

/// Manual review queue
#[async_trait]
pub trait ReviewQueue: Send + Sync {
    /// Queue a ticket
    async fn enqueue(&self, ticket: ReviewTicket) -> Result<()>;

    /// Open tickets, earliest deadline first
    async fn pending(&self) -> Result<Vec<ReviewTicket>>;

    /// Open tickets whose SLA has passed at `now`
    async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<ReviewTicket>>;

    /// Close a ticket, returning it if it was open
    async fn resolve(&self, refund_id: Uuid) -> Result<Option<ReviewTicket>>;
}

/// Decided refunds, one entry per refund id
#[async_trait]
pub trait RefundStore: Send + Sync {
    /// Record a decision; a refund id that was already decided is an error
    async fn store_refund(&self, entry: RefundEntry) -> Result<()>;

    /// Fetch a decided refund
    async fn get_refund(&self, refund_id: Uuid) -> Result<Option<RefundEntry>>;

    /// Every decided refund against a transaction
    async fn refunds_for(&self, transaction_id: Uuid) -> Result<Vec<RefundEntry>>;
}

#[derive(Default)]
struct AuditLogInner {
    records: Vec<AuditRecord>,
    index: HashMap<Uuid, usize>,
}

/// In-memory audit log
#[derive(Default)]
pub struct InMemoryAuditLog {
    inner: RwLock<AuditLogInner>,
}

impl InMemoryAuditLog {
    /// Create new empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in write order
    pub fn records(&self) -> Vec<AuditRecord> {
        self.inner.read().records.clone()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditLog {
    async fn store_audit_record(&self, record: AuditRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(&record.verification_id) {
            return Err(Error::InvalidRequest(format!(
                "audit record {} already exists",
                record.verification_id
            )));
        }
        let position = inner.records.len();
        inner.index.insert(record.verification_id, position);
        inner.records.push(record);
        Ok(())
    }

    async fn audit_record(&self, verification_id: Uuid) -> Result<Option<AuditRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .index
            .get(&verification_id)
            .and_then(|i| inner.records.get(*i))
            .cloned())
    }
}

/// In-memory transaction table
#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: DashMap<Uuid, Transaction>,
}

impl InMemoryTransactionStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn store_transaction(&self, transaction: &Transaction) -> Result<()> {
        match self.rows.entry(transaction.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::InvalidRequest(format!(
                "transaction {} already exists",
                transaction.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(transaction.clone());
                Ok(())
            }
        }
    }

    async fn update_transaction(&self, transaction: &Transaction) -> Result<()> {
        match self.rows.get_mut(&transaction.id) {
            Some(mut row) => {
                *row = transaction.clone();
                Ok(())
            }
            None => Err(Error::TransactionNotFound(transaction.id)),
        }
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.rows.get(&id).map(|row| row.clone()))
    }
}

/// In-memory refund ledger
#[derive(Default)]
pub struct InMemoryRefundStore {
    entries: DashMap<Uuid, RefundEntry>,
}

impl InMemoryRefundStore {
    /// Create new empty ledger
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundStore for InMemoryRefundStore {
    async fn store_refund(&self, entry: RefundEntry) -> Result<()> {
        match self.entries.entry(entry.refund_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Err(Error::InvalidTransition {
                from: existing.get().state.as_str().to_string(),
                to: entry.state.as_str().to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    async fn get_refund(&self, refund_id: Uuid) -> Result<Option<RefundEntry>> {
        Ok(self.entries.get(&refund_id).map(|e| e.clone()))
    }

    async fn refunds_for(&self, transaction_id: Uuid) -> Result<Vec<RefundEntry>> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .map(|e| e.clone())
            .collect();
        found.sort_by_key(|e| e.decided_at);
        Ok(found)
    }
}

/// In-memory review queue
#[derive(Default)]
pub struct InMemoryReviewQueue {
    tickets: RwLock<BTreeMap<Uuid, ReviewTicket>>,
}

impl InMemoryReviewQueue {
    /// Create new empty queue
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewQueue for InMemoryReviewQueue {
    async fn enqueue(&self, ticket: ReviewTicket) -> Result<()> {
        self.tickets.write().insert(ticket.refund_id, ticket);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<ReviewTicket>> {
        let mut open: Vec<_> = self.tickets.read().values().cloned().collect();
        open.sort_by_key(|t| t.deadline);
        Ok(open)
    }

    async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<ReviewTicket>> {
        Ok(self
            .pending()
            .await?
            .into_iter()
            .filter(|t| t.is_overdue(now))
            .collect())
    }

    async fn resolve(&self, refund_id: Uuid) -> Result<Option<ReviewTicket>> {
        Ok(self.tickets.write().remove(&refund_id))
    }
}
