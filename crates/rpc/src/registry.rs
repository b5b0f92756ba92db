use chrono::{DateTime, Utc};
use common::CorrelationId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::RpcError;

/// Outcome delivered to a waiting caller: the raw reply object or an error.
pub type ReplyOutcome = Result<serde_json::Value, RpcError>;

/// A request awaiting its reply.
#[derive(Debug)]
struct PendingRequest {
    request_topic: String,
    deadline: Instant,
    issued_at: Instant,
    created_at: DateTime<Utc>,
    promise: oneshot::Sender<ReplyOutcome>,
}

/// Caller-side handle for a registered request.
#[derive(Debug)]
pub struct PendingHandle {
    correlation_id: CorrelationId,
    deadline: Instant,
    receiver: oneshot::Receiver<ReplyOutcome>,
}

impl PendingHandle {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the request to be resolved or expired.
    pub async fn wait(self) -> ReplyOutcome {
        self.receiver.await.unwrap_or(Err(RpcError::Disconnected))
    }
}

/// Pending requests keyed by correlation id.
///
/// Every entry is removed exactly once: by [`resolve`](Self::resolve) when a
/// reply arrives or by [`expire`](Self::expire) when its deadline passes.
/// Both go through an atomic remove, so when they race only one of them
/// finds the entry and completes the caller.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationId, PendingRequest>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateCorrelationId`] if the id is already
    /// pending. The existing entry is left untouched.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        request_topic: &str,
        deadline: Instant,
    ) -> Result<PendingHandle, RpcError> {
        match self.pending.entry(correlation_id) {
            Entry::Occupied(_) => Err(RpcError::DuplicateCorrelationId(correlation_id)),
            Entry::Vacant(slot) => {
                let (promise, receiver) = oneshot::channel();
                slot.insert(PendingRequest {
                    request_topic: request_topic.to_string(),
                    deadline,
                    issued_at: Instant::now(),
                    created_at: Utc::now(),
                    promise,
                });
                Ok(PendingHandle {
                    correlation_id,
                    deadline,
                    receiver,
                })
            }
        }
    }

    /// Completes a pending request with the given outcome.
    ///
    /// Returns `false` if the id is unknown, already resolved or expired.
    pub fn resolve(&self, correlation_id: &CorrelationId, outcome: ReplyOutcome) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                // The caller may have given up; nothing to do then.
                let _ = pending.promise.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Completes a pending request with [`RpcError::Timeout`].
    ///
    /// Returns `false` if the request already completed.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                let error = RpcError::Timeout {
                    after: pending.issued_at.elapsed(),
                    topic: pending.request_topic,
                };
                tracing::debug!(
                    correlation_id = %correlation_id,
                    created_at = %pending.created_at,
                    %error,
                    "Request expired"
                );
                let _ = pending.promise.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Expires every request whose deadline is at or before `now`.
    ///
    /// Returns how many requests were expired.
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let overdue: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        overdue.iter().filter(|id| self.expire(id)).count()
    }

    /// Fails every pending request with [`RpcError::Disconnected`].
    ///
    /// Returns how many requests were failed.
    pub fn abandon_all(&self) -> usize {
        let pending: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        pending
            .iter()
            .filter(|id| self.resolve(id, Err(RpcError::Disconnected)))
            .count()
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
