//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use outbox::OutboxStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub pending_requests: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsent_outbox: Option<u64>,
}

/// GET /health: reports pending requests and the outbox backlog.
///
/// Answers 503 when the outbox store cannot be reached.
pub async fn check<S: OutboxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let pending_requests = state.registry.len();
    match state.outbox.unsent_count().await {
        Ok(unsent) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                pending_requests,
                unsent_outbox: Some(unsent),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Outbox unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    pending_requests,
                    unsent_outbox: None,
                }),
            )
        }
    }
}
