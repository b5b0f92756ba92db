use thiserror::Error;

/// Errors that can occur when interacting with the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus rejected the hand-off of a message.
    #[error("Publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// The bus has been shut down.
    #[error("Bus is closed")]
    Closed,

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
