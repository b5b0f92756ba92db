//! Node error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{SERVICE_UNAVAILABLE, SagaError};
use thiserror::Error;

/// Errors that stop the node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("Request/reply error: {0}")]
    Rpc(#[from] rpc::RpcError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Metrics recorder error: {0}")]
    Metrics(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot load catalog from {path}: {reason}")]
    Catalog { path: String, reason: String },
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Saga or participant error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::Outbox(_) | SagaError::Bus(_) => {
            tracing::error!(error = %err, "Webhook could not be recorded");
            (StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE.to_string())
        }
        SagaError::StepFailed { .. } | SagaError::Rpc(_) => {
            (StatusCode::CONFLICT, err.user_message())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.user_message()),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_failure_is_unavailable() {
        let response = ApiError::from(SagaError::Outbox(outbox::OutboxError::TransactionFinished))
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_bad_request() {
        let response = ApiError::BadRequest("missing session".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
