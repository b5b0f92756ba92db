use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    Dispatch, DispatchReport, OutboxError, OutboxId, OutboxRecord, OutboxStore, Result,
};

/// In-memory outbox store for testing and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    records: Arc<RwLock<Vec<OutboxRecord>>>,
    sweep: Arc<Mutex<()>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a transaction whose records become visible together on commit.
    pub fn begin(&self) -> OutboxTransaction {
        OutboxTransaction {
            store: self.clone(),
            staged: Some(Vec::new()),
        }
    }

    /// Returns every record, oldest first.
    pub fn records(&self) -> Vec<OutboxRecord> {
        self.read().clone()
    }

    /// Returns records for a topic, oldest first.
    pub fn records_for(&self, topic: &str) -> Vec<OutboxRecord> {
        self.read()
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<OutboxRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<OutboxRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, id: OutboxId, f: impl FnOnce(&mut OutboxRecord)) {
        if let Some(record) = self.write().iter_mut().find(|r| r.id == id) {
            f(record);
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, record: OutboxRecord) -> Result<()> {
        self.write().push(record);
        Ok(())
    }

    async fn dispatch_unsent(
        &self,
        limit: usize,
        dispatch: &dyn Dispatch,
    ) -> Result<DispatchReport> {
        // One sweep at a time, like a row lock held for the batch.
        let _guard = self.sweep.lock().await;

        let mut batch: Vec<OutboxRecord> = self
            .read()
            .iter()
            .filter(|r| !r.sent)
            .cloned()
            .collect();
        batch.sort_by_key(OutboxRecord::sweep_key);
        batch.truncate(limit);

        let mut report = DispatchReport::default();
        for record in &batch {
            match dispatch.dispatch(record).await {
                Ok(()) => {
                    self.update(record.id, |r| r.mark_sent(Utc::now()));
                    report.published += 1;
                }
                Err(reason) => {
                    tracing::warn!(
                        id = %record.id,
                        topic = %record.topic,
                        attempts = record.attempts + 1,
                        %reason,
                        "Outbox dispatch failed"
                    );
                    self.update(record.id, |r| r.mark_failed(Utc::now()));
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.write();
        let before = records.len();
        records.retain(|r| !(r.sent && r.sent_at.is_some_and(|at| at < cutoff)));
        Ok((before - records.len()) as u64)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        Ok(self.read().iter().find(|r| r.id == id).cloned())
    }

    async fn unsent_count(&self) -> Result<u64> {
        Ok(self.read().iter().filter(|r| !r.sent).count() as u64)
    }
}

/// A batch of records staged for atomic insertion.
///
/// Dropping the transaction without committing discards the staged records.
#[derive(Debug)]
pub struct OutboxTransaction {
    store: InMemoryOutboxStore,
    staged: Option<Vec<OutboxRecord>>,
}

impl OutboxTransaction {
    /// Stages a record.
    pub fn enqueue(&mut self, record: OutboxRecord) -> Result<OutboxId> {
        let staged = self
            .staged
            .as_mut()
            .ok_or(OutboxError::TransactionFinished)?;
        let id = record.id;
        staged.push(record);
        Ok(id)
    }

    /// Serializes and stages a record.
    pub fn enqueue_json<T: Serialize + ?Sized>(
        &mut self,
        topic: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<OutboxId> {
        self.enqueue(OutboxRecord::json(topic, event_type, payload)?)
    }

    /// Number of staged records.
    pub fn len(&self) -> usize {
        self.staged.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every staged record visible at once.
    pub fn commit(mut self) -> Result<()> {
        let staged = self.staged.take().ok_or(OutboxError::TransactionFinished)?;
        self.store.write().extend(staged);
        Ok(())
    }

    /// Discards the staged records.
    pub fn rollback(mut self) {
        self.staged = None;
    }
}
