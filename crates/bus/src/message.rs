use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as delivered to a subscriber.
///
/// The payload is opaque bytes; the bus never looks inside it. `attempt`
/// starts at 1 and grows with every redelivery of the same message to the
/// same subscriber.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub payload: Bytes,
    pub published_at: DateTime<Utc>,
    pub attempt: u32,
}

impl Message {
    /// Creates a first-attempt message for a topic.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            payload: payload.into(),
            published_at: Utc::now(),
            attempt: 1,
        }
    }

    /// Returns a copy of this message marked as the next delivery attempt.
    pub fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// Decodes the JSON payload into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        crate::codec::decode(&self.payload)
    }
}
