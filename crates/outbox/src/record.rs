use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Unique identifier for an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A durable event awaiting publication.
///
/// `payload` is the serialized JSON text exactly as it will be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub topic: String,
    pub event_type: String,
    pub payload: String,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Failed dispatch attempts so far.
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Creates an un-sent record from an already serialized payload.
    pub fn new(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            topic: topic.into(),
            event_type: event_type.into(),
            payload: payload.into(),
            sent: false,
            created_at: Utc::now(),
            sent_at: None,
            attempts: 0,
            last_attempt_at: None,
        }
    }

    /// Creates an un-sent record by serializing `payload` as JSON.
    pub fn json<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self::new(topic, event_type, serde_json::to_string(payload)?))
    }

    /// Marks the record as published at `at`.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.sent = true;
        self.sent_at = Some(at);
    }

    /// Records a failed dispatch at `at`.
    ///
    /// Sweeps order un-sent records by last attempt, never-tried first, so a
    /// failing record moves behind the rest of the backlog.
    pub fn mark_failed(&mut self, at: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(at);
    }

    /// Sweep order key: never attempted first, then least recently attempted.
    pub fn sweep_key(&self) -> (Option<DateTime<Utc>>, DateTime<Utc>) {
        (self.last_attempt_at, self.created_at)
    }
}
