use std::time::Duration;

use common::CorrelationId;
use thiserror::Error;

/// Ways a request/reply call can fail.
///
/// `Timeout`, `RemoteError` and `PublishFailure` are recoverable and left to
/// the caller's judgement. `DuplicateCorrelationId` means the id generator is
/// broken and must never be swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// No reply arrived before the deadline.
    #[error("No reply to '{topic}' within {after:?}")]
    Timeout { topic: String, after: Duration },

    /// The bus refused the request.
    #[error("Failed to publish to '{topic}': {reason}")]
    PublishFailure { topic: String, reason: String },

    /// The responder answered with an explicit error message.
    #[error("{0}")]
    RemoteError(String),

    /// A pending request with this id already exists.
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// The reply could not be decoded into the expected type.
    #[error("Malformed reply on '{topic}': {reason}")]
    MalformedReply { topic: String, reason: String },

    /// The pending request was dropped without an outcome.
    #[error("Request abandoned before completion")]
    Disconnected,
}

impl RpcError {
    /// Returns true for errors that indicate a programming defect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RpcError::DuplicateCorrelationId(_))
    }

    /// Returns true when repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout { .. } | RpcError::PublishFailure { .. } | RpcError::Disconnected
        )
    }

    /// Returns true when the remote side may have acted on the request even
    /// though no answer was received.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, RpcError::Timeout { .. } | RpcError::Disconnected)
    }

    /// Returns the responder's message for remote rejections.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            RpcError::RemoteError(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Result type for request/reply operations.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let timeout = RpcError::Timeout {
            topic: "t".into(),
            after: Duration::from_secs(5),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.is_ambiguous());
        assert!(!timeout.is_fatal());

        let remote = RpcError::RemoteError("insufficient stock for product A".into());
        assert!(!remote.is_retryable());
        assert_eq!(
            remote.remote_message(),
            Some("insufficient stock for product A")
        );

        let dup = RpcError::DuplicateCorrelationId(CorrelationId::new());
        assert!(dup.is_fatal());
        assert!(!dup.is_retryable());
    }

    #[test]
    fn remote_error_displays_message_verbatim() {
        let err = RpcError::RemoteError("Order not found.".into());
        assert_eq!(err.to_string(), "Order not found.");
    }
}
