use std::sync::Arc;

use async_trait::async_trait;
use bus::{HandlerError, Message, MessageBus, MessageHandler, Subscription};
use common::CorrelationId;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::ReplyHeader;
use crate::{ReplyEnvelope, RequestEnvelope, Route};

/// A request refused by its owning service.
///
/// The message travels back to the caller verbatim as `errorMessage`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Rejection(pub String);

impl Rejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Owner-side handler for one request topic.
///
/// Requests are delivered at least once, so handlers must give the same
/// answer when they see the same request twice.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send + Sync;

    async fn handle(&self, request: Self::Request) -> Result<Self::Response, Rejection>;
}

/// Subscribes `handler` to the route's request topic and publishes a reply
/// for every request.
///
/// If the reply cannot be published the delivery fails, so the bus redelivers
/// the request and the handler runs again.
pub async fn serve<H: RequestHandler>(
    bus: Arc<dyn MessageBus>,
    route: Route,
    handler: Arc<H>,
) -> bus::Result<Subscription> {
    let responder = Arc::new(Responder {
        bus: bus.clone(),
        route,
        handler,
    });
    tracing::info!(topic = route.request, "Serving requests");
    bus.subscribe(route.request, responder).await
}

struct Responder<H: RequestHandler> {
    bus: Arc<dyn MessageBus>,
    route: Route,
    handler: Arc<H>,
}

impl<H: RequestHandler> Responder<H> {
    async fn reply<T: Serialize + Sync>(&self, envelope: &ReplyEnvelope<T>) -> Result<(), HandlerError> {
        let payload = bus::codec::encode(envelope)?;
        self.bus.publish(self.route.response, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl<H: RequestHandler> MessageHandler for Responder<H> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let request = match message.decode::<RequestEnvelope<H::Request>>() {
            Ok(request) => request,
            Err(e) => {
                // Answer if we can at least tell who asked.
                return match message.decode::<ReplyHeader>() {
                    Ok(header) => {
                        tracing::warn!(topic = self.route.request, error = %e, "Rejecting malformed request");
                        self.reply(&ReplyEnvelope::<()>::error(
                            header.correlation_id,
                            format!("Malformed request: {e}"),
                        ))
                        .await
                    }
                    Err(_) => {
                        tracing::warn!(topic = self.route.request, error = %e, "Discarding request without correlation id");
                        Ok(())
                    }
                };
            }
        };

        let correlation_id: CorrelationId = request.correlation_id;
        let envelope = match self.handler.handle(request.body).await {
            Ok(body) => ReplyEnvelope::ok(correlation_id, body),
            Err(rejection) => {
                tracing::info!(
                    topic = self.route.request,
                    %correlation_id,
                    reason = rejection.message(),
                    "Request rejected"
                );
                ReplyEnvelope::error(correlation_id, rejection.0)
            }
        };
        self.reply(&envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RequestReplyClient, RpcError};
    use bus::{InMemoryBus, MessageBusExt};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize, Serialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    #[derive(Debug, Deserialize, Serialize)]
    struct Sum {
        sum: i64,
    }

    #[derive(Default)]
    struct Adder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for Adder {
        type Request = Add;
        type Response = Sum;

        async fn handle(&self, request: Add) -> Result<Sum, Rejection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.b < 0 {
                return Err(Rejection::new("negative operand"));
            }
            Ok(Sum {
                sum: request.a + request.b,
            })
        }
    }

    const ROUTE: Route = Route::new("add-request", "add-response");

    #[tokio::test]
    async fn served_handler_answers_calls() {
        let bus = Arc::new(InMemoryBus::new());
        serve(bus.clone(), ROUTE, Arc::new(Adder::default()))
            .await
            .unwrap();
        let client = RequestReplyClient::new(bus.clone());

        let reply: Sum = client.call(&ROUTE, &Add { a: 2, b: 3 }).await.unwrap();
        assert_eq!(reply.sum, 5);
    }

    #[tokio::test]
    async fn rejection_reaches_caller_as_remote_error() {
        let bus = Arc::new(InMemoryBus::new());
        serve(bus.clone(), ROUTE, Arc::new(Adder::default()))
            .await
            .unwrap();
        let client = RequestReplyClient::new(bus.clone());

        let err = client
            .call::<_, Sum>(&ROUTE, &Add { a: 2, b: -1 })
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::RemoteError("negative operand".into()));
    }

    #[tokio::test]
    async fn malformed_request_gets_error_reply() {
        let bus = Arc::new(InMemoryBus::new());
        serve(bus.clone(), ROUTE, Arc::new(Adder::default()))
            .await
            .unwrap();
        let client = RequestReplyClient::new(bus.clone());

        let err = client
            .call::<_, Sum>(&ROUTE, &json!({ "a": "two" }))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::RemoteError(ref m) if m.starts_with("Malformed request")));
    }

    #[tokio::test]
    async fn failed_reply_publish_redelivers_request() {
        let bus = Arc::new(InMemoryBus::new());
        let adder = Arc::new(Adder::default());
        serve(bus.clone(), ROUTE, adder.clone()).await.unwrap();
        bus.fail_topic(ROUTE.response);

        let correlation_id = CorrelationId::new();
        bus.publish_json(
            ROUTE.request,
            &RequestEnvelope::new(correlation_id, Add { a: 1, b: 1 }),
        )
        .await
        .unwrap();

        while adder.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        bus.heal_topic(ROUTE.response);
        assert!(adder.calls.load(Ordering::SeqCst) >= 2);
    }
}
