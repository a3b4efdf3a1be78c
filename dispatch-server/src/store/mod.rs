//! redb-based canonical order store
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `Order` | Canonical order records |
//! | `natural_keys` | `(channel_id, external_order_id)` | `order_id` | Dedup index |
//! | `job_index` | `delivery_job_id` | `order_id` | Webhook lookup |
//! | `sync_logs` | `(channel_id, started_at_ms, log_id)` | `SyncLog` | Sync audit trail |
//! | `review_flags` | `flag_id` | `ReviewFlag` | Manual-review queue |
//!
//! # Concurrency
//!
//! redb has a single writer; every mutation goes through one write
//! transaction. `update_with` does the whole read-modify-write inside that
//! transaction, which is what serializes concurrent webhook deliveries,
//! sync updates, and operator edits touching the same order.

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
};
use shared::models::SyncLog;
use shared::order::Order;
use shared::util::now_millis;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Canonical orders: key = order_id, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Natural-key dedup index: key = (channel_id, external_order_id), value = order_id
const NATURAL_KEYS_TABLE: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("natural_keys");

/// Delivery job index: key = delivery_job_id, value = order_id
const JOB_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("job_index");

/// Sync audit trail: key = (channel_id, started_at_ms, log_id), value = JSON SyncLog
const SYNC_LOGS_TABLE: TableDefinition<(&str, u64, &str), &[u8]> =
    TableDefinition::new("sync_logs");

/// Manual-review queue: key = flag_id, value = JSON ReviewFlag
const REVIEW_FLAGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("review_flags");

/// Why an order was flagged for manual review
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Remote delivery job was created but the local link failed to persist
    OrphanedRemoteJob,
    /// Provider keeps sending transitions the state machine rejects
    RepeatedInvalidTransition,
}

/// Entry in the operator-facing review queue
///
/// Never auto-resolved; an operator clears it via `resolve_review_flag`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReviewFlag {
    pub id: String,
    pub order_id: String,
    pub reason: ReviewReason,
    pub detail: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl ReviewFlag {
    pub fn new(order_id: impl Into<String>, reason: ReviewReason, detail: impl Into<String>) -> Self {
        Self {
            id: shared::util::new_id(),
            order_id: order_id.into(),
            reason,
            detail: detail.into(),
            created_at: now_millis(),
            resolved_at: None,
        }
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order already exists for ({channel_id}, {external_order_id}): {existing_order_id}")]
    DuplicateKey {
        channel_id: String,
        external_order_id: String,
        existing_order_id: String,
    },

    #[error("delivery_job_id is set-once: order {order_id} already linked to {existing}")]
    JobIdImmutable { order_id: String, existing: String },

    #[error("invoice_id is set-once: order {order_id} already invoiced as {existing}")]
    InvoiceIdImmutable { order_id: String, existing: String },

    /// Mutation rejected by domain logic inside `update_with`
    #[error("{0}")]
    Rejected(#[from] shared::AppError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Order store backed by redb
#[derive(Clone)]
pub struct OrderStore {
    db: Arc<Database>,
}

impl OrderStore {
    /// Open or create the database at the given path
    ///
    /// redb commits with `Durability::Immediate`: once `commit()` returns the
    /// write is on disk and the file is in a consistent state.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::init_tables(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init_tables(db)
    }

    fn init_tables(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(NATURAL_KEYS_TABLE)?;
            let _ = write_txn.open_table(JOB_INDEX_TABLE)?;
            let _ = write_txn.open_table(SYNC_LOGS_TABLE)?;
            let _ = write_txn.open_table(REVIEW_FLAGS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    // ========== Order Operations ==========

    /// Insert a brand-new order, writing the natural-key index in the same
    /// transaction
    ///
    /// A concurrent insert of the same `(channel_id, external_order_id)`
    /// surfaces `DuplicateKey` with the winner's order id; callers take the
    /// update path instead.
    pub fn insert_new(&self, order: &Order) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut keys_table = txn.open_table(NATURAL_KEYS_TABLE)?;
            let nk = (order.channel_id.as_str(), order.external_order_id.as_str());

            if let Some(existing) = keys_table.get(nk)? {
                return Err(StoreError::DuplicateKey {
                    channel_id: order.channel_id.clone(),
                    external_order_id: order.external_order_id.clone(),
                    existing_order_id: existing.value().to_string(),
                });
            }
            keys_table.insert(nk, order.id.as_str())?;

            let mut orders_table = txn.open_table(ORDERS_TABLE)?;
            let value = serde_json::to_vec(order)?;
            orders_table.insert(order.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Get an order by internal ID
    pub fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        match table.get(order_id)? {
            Some(value) => {
                let order: Order = serde_json::from_slice(value.value())?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// Look up an order by its natural key
    pub fn find_by_natural_key(
        &self,
        channel_id: &str,
        external_order_id: &str,
    ) -> StoreResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let keys_table = read_txn.open_table(NATURAL_KEYS_TABLE)?;

        let order_id = match keys_table.get((channel_id, external_order_id))? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };

        let orders_table = read_txn.open_table(ORDERS_TABLE)?;
        match orders_table.get(order_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up an order by its delivery job id (webhook path)
    pub fn find_by_job_id(&self, job_id: &str) -> StoreResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let job_table = read_txn.open_table(JOB_INDEX_TABLE)?;

        let order_id = match job_table.get(job_id)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };

        let orders_table = read_txn.open_table(ORDERS_TABLE)?;
        match orders_table.get(order_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All orders (operational listing; the store is per-merchant and small)
    pub fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut orders = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            orders.push(serde_json::from_slice(value.value())?);
        }
        Ok(orders)
    }

    /// Atomic read-modify-write of one order
    ///
    /// The closure sees the current record and mutates it in place; the store
    /// bumps `version`, stamps `updated_at` implicitly through the closure's
    /// edits, enforces the set-once fields, and maintains the job index. The
    /// closure returning `Err` aborts the transaction with nothing written.
    pub fn update_with<R>(
        &self,
        order_id: &str,
        f: impl FnOnce(&mut Order) -> Result<R, shared::AppError>,
    ) -> StoreResult<R> {
        let txn = self.db.begin_write()?;
        let result = {
            let mut orders_table = txn.open_table(ORDERS_TABLE)?;

            let before: Order = match orders_table.get(order_id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::OrderNotFound(order_id.to_string())),
            };

            let mut after = before.clone();
            let result = f(&mut after)?;

            // Set-once fields
            if let Some(existing) = &before.delivery_job_id
                && after.delivery_job_id.as_ref() != Some(existing)
            {
                return Err(StoreError::JobIdImmutable {
                    order_id: order_id.to_string(),
                    existing: existing.clone(),
                });
            }
            if let Some(existing) = &before.invoice_id
                && after.invoice_id.as_ref() != Some(existing)
            {
                return Err(StoreError::InvoiceIdImmutable {
                    order_id: order_id.to_string(),
                    existing: existing.clone(),
                });
            }

            after.version = before.version + 1;
            let value = serde_json::to_vec(&after)?;
            orders_table.insert(order_id, value.as_slice())?;

            // Newly linked job goes into the index
            if before.delivery_job_id.is_none()
                && let Some(job_id) = &after.delivery_job_id
            {
                let mut job_table = txn.open_table(JOB_INDEX_TABLE)?;
                job_table.insert(job_id.as_str(), order_id)?;
            }

            result
        };
        txn.commit()?;
        Ok(result)
    }

    // ========== Sync Logs ==========

    /// Persist a sync log (insert or overwrite by key)
    pub fn write_sync_log(&self, log: &SyncLog) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SYNC_LOGS_TABLE)?;
            let key = (
                log.channel_id.as_str(),
                log.started_at.timestamp_millis() as u64,
                log.id.as_str(),
            );
            let value = serde_json::to_vec(log)?;
            table.insert(key, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Most recent sync logs for a channel, newest first
    pub fn recent_sync_logs(&self, channel_id: &str, limit: usize) -> StoreResult<Vec<SyncLog>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SYNC_LOGS_TABLE)?;

        let mut logs = Vec::new();
        for result in table.range((channel_id, 0u64, "")..)? {
            let (key, value) = result?;
            if key.value().0 != channel_id {
                break;
            }
            logs.push(serde_json::from_slice(value.value())?);
        }

        logs.reverse();
        logs.truncate(limit);
        Ok(logs)
    }

    // ========== Review Flags ==========

    /// Add an order to the manual-review queue
    pub fn flag_for_review(&self, flag: &ReviewFlag) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(REVIEW_FLAGS_TABLE)?;
            let value = serde_json::to_vec(flag)?;
            table.insert(flag.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// All unresolved review flags
    pub fn open_review_flags(&self) -> StoreResult<Vec<ReviewFlag>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REVIEW_FLAGS_TABLE)?;

        let mut flags = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let flag: ReviewFlag = serde_json::from_slice(value.value())?;
            if flag.resolved_at.is_none() {
                flags.push(flag);
            }
        }
        Ok(flags)
    }

    /// Mark a review flag resolved (operator action); no-op if unknown
    pub fn resolve_review_flag(&self, flag_id: &str) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(REVIEW_FLAGS_TABLE)?;

            let flag_opt = if let Some(value) = table.get(flag_id)? {
                let flag: ReviewFlag = serde_json::from_slice(value.value())?;
                Some(flag)
            } else {
                None
            };

            if let Some(mut flag) = flag_opt
                && flag.resolved_at.is_none()
            {
                flag.resolved_at = Some(now_millis());
                let value = serde_json::to_vec(&flag)?;
                table.insert(flag_id, value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    // ========== Statistics ==========

    /// Get store statistics
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let read_txn = self.db.begin_read()?;

        let orders_table = read_txn.open_table(ORDERS_TABLE)?;
        let job_table = read_txn.open_table(JOB_INDEX_TABLE)?;
        let logs_table = read_txn.open_table(SYNC_LOGS_TABLE)?;
        let flags_table = read_txn.open_table(REVIEW_FLAGS_TABLE)?;

        Ok(StoreStats {
            order_count: orders_table.len()?,
            dispatched_count: job_table.len()?,
            sync_log_count: logs_table.len()?,
            review_flag_count: flags_table.len()?,
        })
    }
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub order_count: u64,
    pub dispatched_count: u64,
    pub sync_log_count: u64,
    pub review_flag_count: u64,
}
