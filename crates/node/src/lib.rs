//! Shop node: every saga participant on one bus.
//!
//! Serves `/health`, `/metrics` and the payment provider callback, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod mailer;
pub mod node;
pub mod routes;
pub mod seed;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::OutboxStore;
use rpc::CorrelationRegistry;
use saga::PaymentWebhook;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::{ApiError, NodeError};
pub use node::Node;

/// Shared state for HTTP handlers.
pub struct AppState<S: OutboxStore> {
    pub webhook: PaymentWebhook<S>,
    pub outbox: Arc<S>,
    pub registry: Arc<CorrelationRegistry>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OutboxStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/webhooks/payment", post(routes::webhook::payment::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
