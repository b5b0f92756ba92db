use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{OutboxId, OutboxRecord, Result};

/// Hands a claimed record to its destination.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Publishes the record. An error leaves the record un-sent.
    async fn dispatch(&self, record: &OutboxRecord) -> std::result::Result<(), String>;
}

/// Outcome of one pass over un-sent records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub published: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.published == 0 && self.failed == 0
    }
}

/// Core trait for outbox storage.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persists a single record in its own transaction.
    async fn enqueue(&self, record: OutboxRecord) -> Result<()>;

    /// Claims up to `limit` un-sent records, oldest first, passes each to
    /// `dispatch`, and marks sent the ones that were acknowledged.
    ///
    /// Records claimed by a concurrent sweep are skipped.
    async fn dispatch_unsent(&self, limit: usize, dispatch: &dyn Dispatch)
    -> Result<DispatchReport>;

    /// Deletes sent records whose `sent_at` is before `cutoff`.
    ///
    /// Returns the number of deleted records. Un-sent records are never
    /// deleted.
    async fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Retrieves a record by id.
    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>>;

    /// Counts records not yet published.
    async fn unsent_count(&self) -> Result<u64>;
}

/// Extension trait providing convenience methods for outbox stores.
#[async_trait]
pub trait OutboxStoreExt: OutboxStore {
    /// Serializes `payload` and enqueues it.
    async fn enqueue_json<T: Serialize + Sync>(
        &self,
        topic: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<OutboxId> {
        let record = OutboxRecord::json(topic, event_type, payload)?;
        let id = record.id;
        self.enqueue(record).await?;
        Ok(id)
    }
}

impl<T: OutboxStore + ?Sized> OutboxStoreExt for T {}
