//! Payment provider callback.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use common::SessionId;
use outbox::OutboxStore;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

/// Event posted by the payment provider.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: SessionId,
}

/// POST /webhooks/payment: records a completed payment for delivery on `order-paid`.
///
/// Answers 202 once the confirmation is in the outbox and 200 for event
/// types the shop does not act on.
pub async fn payment<S: OutboxStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<ProviderEvent>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(event) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let recorded = state
        .webhook
        .handle(&event.event_type, event.session_id)
        .await?;

    let outcome = if recorded.is_some() { "recorded" } else { "ignored" };
    metrics::counter!("payment_webhooks_total", "outcome" => outcome).increment(1);
    Ok(match recorded {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::OK,
    })
}
