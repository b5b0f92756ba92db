//! Payment provider seam and the provider webhook.
//!
//! The payment service opens checkout sessions with an external provider
//! and learns about completed payments through a webhook. Completions are
//! written to the outbox so the order owner is told even if the bus is down
//! when the webhook arrives.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bus::topics;
use common::{Money, OrderId, SessionId};
use domain::PaymentMethod;
use outbox::{OutboxId, OutboxStore, OutboxStoreExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

/// Provider event type signalling a paid checkout session.
pub const SESSION_COMPLETED: &str = "checkout.session.completed";

/// Outbox event type for payment confirmations.
pub const ORDER_PAID_EVENT: &str = "order-paid";

/// Errors reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Payment provider refused the session: {0}")]
    Refused(String),

    #[error("Payment provider unavailable")]
    Unavailable,
}

/// What the provider needs to open a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub total_price: Money,
    pub payment_method: PaymentMethod,
}

/// An open checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub session_id: SessionId,
    /// Where the customer completes the payment.
    pub url: String,
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn open_session(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<PaymentSession, GatewayError>;
}

#[derive(Debug, Default)]
struct GatewayState {
    sessions: HashMap<SessionId, PaymentRequest>,
    failures: usize,
}

/// In-memory payment provider for tests and local runs.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    checkout_url: String,
    state: Arc<RwLock<GatewayState>>,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new("http://localhost:3000/checkout/")
    }
}

impl InMemoryPaymentGateway {
    /// Creates a gateway whose session urls start with `checkout_url`.
    pub fn new(checkout_url: impl Into<String>) -> Self {
        Self {
            checkout_url: checkout_url.into(),
            state: Arc::default(),
        }
    }

    /// Makes the next `n` session requests fail.
    pub fn fail_next(&self, n: usize) {
        self.write().failures = n;
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// Returns the request a session was opened for.
    pub fn session(&self, session_id: &SessionId) -> Option<PaymentRequest> {
        self.read().sessions.get(session_id).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GatewayState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GatewayState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn open_session(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<PaymentSession, GatewayError> {
        let mut state = self.write();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(GatewayError::Unavailable);
        }

        let session_id = SessionId::new(format!("cs_{}", uuid::Uuid::new_v4().simple()));
        state.sessions.insert(session_id.clone(), request.clone());
        Ok(PaymentSession {
            url: format!("{}{}", self.checkout_url, session_id),
            session_id,
        })
    }
}

/// Receives provider callbacks and records payment confirmations.
pub struct PaymentWebhook<S: OutboxStore> {
    outbox: Arc<S>,
}

impl<S: OutboxStore> PaymentWebhook<S> {
    pub fn new(outbox: Arc<S>) -> Self {
        Self { outbox }
    }

    /// Handles one provider event.
    ///
    /// A completed session is enqueued on `order-paid` with the session id as
    /// payload; other event types are ignored. Returns the outbox id of the
    /// enqueued confirmation.
    #[tracing::instrument(skip(self))]
    pub async fn handle(&self, event_type: &str, session_id: SessionId) -> Result<Option<OutboxId>> {
        if event_type != SESSION_COMPLETED {
            tracing::debug!("Ignoring provider event");
            return Ok(None);
        }
        let id = self
            .outbox
            .enqueue_json(topics::ORDER_PAID, ORDER_PAID_EVENT, &session_id)
            .await?;
        tracing::info!(outbox_id = %id, "Payment confirmation enqueued");
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox::InMemoryOutboxStore;

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: OrderId::new(),
            total_price: Money::from_dollars(20),
            payment_method: PaymentMethod::Card,
        }
    }

    #[tokio::test]
    async fn gateway_opens_distinct_sessions() {
        let gateway = InMemoryPaymentGateway::new("https://pay.test/");
        let a = gateway.open_session(&request()).await.unwrap();
        let b = gateway.open_session(&request()).await.unwrap();

        assert_ne!(a.session_id, b.session_id);
        assert!(a.url.starts_with("https://pay.test/cs_"));
        assert_eq!(gateway.session_count(), 2);
    }

    #[tokio::test]
    async fn gateway_failures_are_injected() {
        let gateway = InMemoryPaymentGateway::default();
        gateway.fail_next(1);
        assert_eq!(
            gateway.open_session(&request()).await,
            Err(GatewayError::Unavailable)
        );
        assert!(gateway.open_session(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn completed_session_is_enqueued() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let webhook = PaymentWebhook::new(outbox.clone());

        let id = webhook
            .handle(SESSION_COMPLETED, SessionId::new("cs_9"))
            .await
            .unwrap()
            .unwrap();

        let record = outbox.get(id).await.unwrap().unwrap();
        assert_eq!(record.topic, topics::ORDER_PAID);
        assert_eq!(record.event_type, ORDER_PAID_EVENT);
        assert_eq!(record.payload, "\"cs_9\"");
        assert!(!record.sent);
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let webhook = PaymentWebhook::new(outbox.clone());

        let id = webhook
            .handle("checkout.session.expired", SessionId::new("cs_9"))
            .await
            .unwrap();

        assert!(id.is_none());
        assert_eq!(outbox.unsent_count().await.unwrap(), 0);
    }
}
