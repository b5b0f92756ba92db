//! Saga error types.

use bus::BusError;
use domain::OrderError;
use outbox::OutboxError;
use rpc::RpcError;
use thiserror::Error;

use crate::participants::payment::GatewayError;

/// Shown to the customer when a step failed for a reason they cannot act on.
pub const SERVICE_UNAVAILABLE: &str = "Service unavailable, please try again later";

/// Why a single saga step failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The request/reply exchange with a participant failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The payment provider refused to open a session.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A previous step did not leave the data this step needs.
    #[error("Missing saga data: {0}")]
    MissingData(&'static str),
}

impl StepError {
    /// Returns the owning service's rejection text, if the step was refused.
    pub fn rejection(&self) -> Option<&str> {
        match self {
            StepError::Rpc(e) => e.remote_message(),
            _ => None,
        }
    }

    /// Returns true when the participant's side of the step is unknown: no
    /// answer arrived, or the request never left and may be retried by the bus.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, StepError::Rpc(e) if e.is_ambiguous() || matches!(e, RpcError::PublishFailure { .. }))
    }

    /// Returns true when repeating the step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Rpc(e) if e.is_retryable())
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga step failed; completed steps were compensated.
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: &'static str, reason: StepError },

    /// Request/reply failure outside a saga step.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Order owner error.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Payment provider error outside a saga step.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Outbox error.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Bus error while wiring a participant.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl SagaError {
    /// Returns the message to show the customer.
    ///
    /// A business rejection such as `insufficient stock for product X` is
    /// passed through verbatim; transport failures become a generic message.
    pub fn user_message(&self) -> String {
        match self {
            SagaError::StepFailed { reason, .. } => reason
                .rejection()
                .map_or_else(|| SERVICE_UNAVAILABLE.to_string(), str::to_string),
            SagaError::Rpc(e) => e
                .remote_message()
                .map_or_else(|| SERVICE_UNAVAILABLE.to_string(), str::to_string),
            SagaError::Order(e) => e.to_string(),
            SagaError::Gateway(_) | SagaError::Outbox(_) | SagaError::Bus(_) => {
                SERVICE_UNAVAILABLE.to_string()
            }
        }
    }

    /// Returns the name of the failed step, if a step failed.
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            SagaError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
