use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::{HandlerError, Message, MessageBus, MessageHandler, Subscription};
use common::CorrelationId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::envelope::{ReplyHeader, RequestEnvelope};
use crate::{CorrelationRegistry, DeadlineScheduler, Result, Route, RpcError};

/// Issues correlated requests over a bus and waits for their replies.
///
/// Cheap to clone; clones share the registry, the deadline scheduler and the
/// reply subscriptions.
#[derive(Clone)]
pub struct RequestReplyClient {
    bus: Arc<dyn MessageBus>,
    registry: Arc<CorrelationRegistry>,
    scheduler: DeadlineScheduler,
    listening: Arc<Mutex<HashMap<&'static str, Subscription>>>,
}

impl RequestReplyClient {
    /// Creates a client with its own registry.
    ///
    /// Must be called inside a tokio runtime: it spawns the deadline
    /// scheduler.
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_registry(bus, Arc::new(CorrelationRegistry::new()))
    }

    /// Creates a client around an existing registry.
    pub fn with_registry(bus: Arc<dyn MessageBus>, registry: Arc<CorrelationRegistry>) -> Self {
        let scheduler = DeadlineScheduler::spawn(registry.clone());
        Self {
            bus,
            registry,
            scheduler,
            listening: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Starts routing replies from `response_topic` into the registry.
    ///
    /// Idempotent: a topic is subscribed at most once per client.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::PublishFailure`] if the bus rejects the subscription.
    #[tracing::instrument(skip(self))]
    pub async fn listen(&self, response_topic: &'static str) -> Result<()> {
        let mut listening = self.listening.lock().await;
        if listening.contains_key(response_topic) {
            return Ok(());
        }

        let router = Arc::new(ReplyRouter {
            topic: response_topic,
            registry: self.registry.clone(),
        });
        let subscription = self
            .bus
            .subscribe(response_topic, router)
            .await
            .map_err(|e| RpcError::PublishFailure {
                topic: response_topic.to_string(),
                reason: e.to_string(),
            })?;
        listening.insert(response_topic, subscription);
        tracing::debug!("Listening for replies");
        Ok(())
    }

    /// Stops every reply subscription and fails outstanding requests with
    /// [`RpcError::Disconnected`].
    pub async fn shutdown(&self) {
        let mut listening = self.listening.lock().await;
        for (_, subscription) in listening.drain() {
            subscription.cancel();
        }
        let abandoned = self.registry.abandon_all();
        if abandoned > 0 {
            tracing::info!(abandoned, "Failed outstanding requests on shutdown");
        }
    }

    /// Sends a request on `route` and waits for the correlated reply.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no reply arrives within `route.timeout`
    /// - [`RpcError::PublishFailure`] if the bus refuses the request
    /// - [`RpcError::RemoteError`] if the responder rejects it
    /// - [`RpcError::MalformedReply`] if the reply does not decode as `Resp`
    #[tracing::instrument(
        skip(self, request),
        fields(topic = route.request, correlation_id = tracing::field::Empty)
    )]
    pub async fn call<Req, Resp>(&self, route: &Route, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        self.call_with_timeout(route, request, route.timeout).await
    }

    /// Like [`call`](Self::call) with an explicit deadline.
    pub async fn call_with_timeout<Req, Resp>(
        &self,
        route: &Route,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        self.listen(route.response).await?;

        let started = Instant::now();
        let correlation_id = CorrelationId::new();
        tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));

        let deadline = started + timeout;
        let handle = self
            .registry
            .register(correlation_id, route.request, deadline)?;

        // Armed before publishing so a stalled publish or a dropped caller
        // cannot leave the entry behind.
        self.scheduler.schedule(correlation_id, deadline);

        let envelope = RequestEnvelope::new(correlation_id, request);
        let publish = async {
            let payload = bus::codec::encode(&envelope)?;
            self.bus.publish(route.request, payload).await
        };

        match tokio::time::timeout_at(deadline, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Request publish failed");
                self.registry.resolve(
                    &correlation_id,
                    Err(RpcError::PublishFailure {
                        topic: route.request.to_string(),
                        reason: e.to_string(),
                    }),
                );
            }
            Err(_) => tracing::warn!("Request publish outlived its deadline"),
        }

        let outcome = handle.wait().await;
        let status = match &outcome {
            Ok(_) => "ok",
            Err(RpcError::Timeout { .. }) => "timeout",
            Err(RpcError::RemoteError(_)) => "rejected",
            Err(_) => "failed",
        };
        metrics::counter!("rpc_calls_total", "topic" => route.request, "status" => status)
            .increment(1);
        metrics::histogram!("rpc_call_duration_seconds", "topic" => route.request)
            .record(started.elapsed().as_secs_f64());

        let reply = outcome?;
        serde_json::from_value(reply).map_err(|e| RpcError::MalformedReply {
            topic: route.response.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Routes replies on one response topic to their waiting callers.
struct ReplyRouter {
    topic: &'static str,
    registry: Arc<CorrelationRegistry>,
}

#[async_trait]
impl MessageHandler for ReplyRouter {
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError> {
        let reply: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(topic = self.topic, error = %e, "Discarding undecodable reply");
                return Ok(());
            }
        };
        let header: ReplyHeader = match ReplyHeader::deserialize(&reply) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(topic = self.topic, error = %e, "Discarding reply without correlation id");
                return Ok(());
            }
        };

        let outcome = match header.error_message {
            Some(message) => Err(RpcError::RemoteError(message)),
            None => Ok(reply),
        };

        if !self.registry.resolve(&header.correlation_id, outcome) {
            // Late, duplicate, or addressed to another instance.
            tracing::debug!(
                topic = self.topic,
                correlation_id = %header.correlation_id,
                "Dropping unroutable reply"
            );
            metrics::counter!("rpc_unroutable_replies_total", "topic" => self.topic).increment(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplyEnvelope;
    use crate::routes;
    use bus::{InMemoryBus, MessageBusExt, handler_fn};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Ping {
        n: u32,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Pong {
        doubled: u32,
    }

    const ROUTE: Route = Route::new("ping-request", "ping-response");

    /// Subscribes a responder that answers every request with `reply`.
    async fn respond_with<F>(bus: &InMemoryBus, reply: F)
    where
        F: Fn(CorrelationId, u32) -> serde_json::Value + Send + Sync + 'static,
    {
        let reply = Arc::new(reply);
        let responder_bus = bus.clone();
        bus.subscribe(
            ROUTE.request,
            handler_fn(move |message: Message| {
                let bus = responder_bus.clone();
                let reply = reply.clone();
                async move {
                    let request: RequestEnvelope<Ping> = message.decode()?;
                    let body = reply(request.correlation_id, request.body.n);
                    bus.publish_json(ROUTE.response, &body).await?;
                    Ok::<(), HandlerError>(())
                }
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn call_returns_correlated_reply() {
        let bus = InMemoryBus::new();
        respond_with(&bus, |id, n| {
            json!({ "correlationId": id.to_string(), "doubled": n * 2 })
        })
        .await;
        let client = RequestReplyClient::new(Arc::new(bus.clone()));

        let pong: Pong = client.call(&ROUTE, &Ping { n: 21 }).await.unwrap();

        assert_eq!(pong, Pong { doubled: 42 });
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn concurrent_calls_are_not_cross_wired() {
        let bus = InMemoryBus::new();
        respond_with(&bus, |id, n| {
            json!({ "correlationId": id.to_string(), "doubled": n * 2 })
        })
        .await;
        let client = RequestReplyClient::new(Arc::new(bus.clone()));

        let calls = (0..50u32).map(|n| {
            let client = client.clone();
            tokio::spawn(async move {
                let pong: Pong = client.call(&ROUTE, &Ping { n }).await.unwrap();
                (n, pong.doubled)
            })
        });
        for call in calls {
            let (n, doubled) = call.await.unwrap();
            assert_eq!(doubled, n * 2);
        }
    }

    #[tokio::test]
    async fn error_message_becomes_remote_error() {
        let bus = InMemoryBus::new();
        respond_with(&bus, |id, _| {
            serde_json::to_value(ReplyEnvelope::<()>::error(
                id,
                "insufficient stock for product B",
            ))
            .unwrap()
        })
        .await;
        let client = RequestReplyClient::new(Arc::new(bus.clone()));

        let err = client
            .call::<_, Pong>(&ROUTE, &Ping { n: 1 })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RpcError::RemoteError("insufficient stock for product B".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_five_seconds_without_reply() {
        let bus = InMemoryBus::new();
        let client = RequestReplyClient::new(Arc::new(bus.clone()));
        let started = Instant::now();

        let err = client
            .call::<_, Pong>(&ROUTE, &Ping { n: 1 })
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout { ref topic, .. } if topic == "ping-request"));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5), "expired early: {waited:?}");
        assert!(waited < Duration::from_secs(6), "expired late: {waited:?}");
        assert!(client.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_dropped() {
        let bus = InMemoryBus::new();
        let client = RequestReplyClient::new(Arc::new(bus.clone()));
        let route = ROUTE.with_timeout(Duration::from_secs(1));

        let err = client.call::<_, Pong>(&route, &Ping { n: 1 }).await;
        assert!(matches!(err, Err(RpcError::Timeout { .. })));

        let request: RequestEnvelope<Ping> = bus.published(ROUTE.request)[0].decode().unwrap();
        bus.publish_json(
            ROUTE.response,
            &json!({ "correlationId": request.correlation_id.to_string(), "doubled": 2 }),
        )
        .await
        .unwrap();
        tokio::task::yield_now().await;

        assert!(client.registry().is_empty());
        assert!(bus.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_reported_and_cleaned_up() {
        let bus = InMemoryBus::new();
        bus.fail_next_publishes(1);
        let client = RequestReplyClient::new(Arc::new(bus.clone()));

        let err = client
            .call::<_, Pong>(&ROUTE, &Ping { n: 1 })
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::PublishFailure { ref topic, .. } if topic == "ping-request"));
        assert!(client.registry().is_empty());
    }

    /// A bus whose publish never completes.
    struct StalledBus;

    #[async_trait]
    impl MessageBus for StalledBus {
        async fn publish(&self, _topic: &str, _payload: bytes::Bytes) -> bus::Result<()> {
            std::future::pending().await
        }

        async fn subscribe(
            &self,
            topic: &str,
            _handler: Arc<dyn MessageHandler>,
        ) -> bus::Result<Subscription> {
            Ok(Subscription::detached(topic))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_publish_times_out_and_cleans_up() {
        let client = RequestReplyClient::new(Arc::new(StalledBus));
        let route = ROUTE.with_timeout(Duration::from_secs(1));

        let err = client
            .call::<_, Pong>(&route, &Ping { n: 1 })
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout { .. }));
        assert!(client.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn caller_dropped_during_publish_leaves_no_entry() {
        let client = RequestReplyClient::new(Arc::new(StalledBus));
        let route = ROUTE.with_timeout(Duration::from_secs(1));

        let gave_up = tokio::time::timeout(
            Duration::from_millis(100),
            client.call::<_, Pong>(&route, &Ping { n: 1 }),
        )
        .await;
        assert!(gave_up.is_err());
        assert_eq!(client.registry().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn shutdown_fails_outstanding_requests() {
        let bus = InMemoryBus::new();
        let client = RequestReplyClient::new(Arc::new(bus.clone()));
        let route = ROUTE.with_timeout(Duration::from_secs(60));

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.call::<_, Pong>(&route, &Ping { n: 1 }).await })
        };
        while client.registry().is_empty() {
            tokio::task::yield_now().await;
        }

        client.shutdown().await;

        let err = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err, RpcError::Disconnected);
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn reply_of_wrong_shape_is_malformed() {
        let bus = InMemoryBus::new();
        respond_with(&bus, |id, _| json!({ "correlationId": id.to_string() })).await;
        let client = RequestReplyClient::new(Arc::new(bus.clone()));

        let err = client
            .call::<_, Pong>(&ROUTE, &Ping { n: 1 })
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::MalformedReply { .. }));
    }

    #[tokio::test]
    async fn duplicate_replies_resolve_once() {
        let bus = InMemoryBus::new();
        bus.set_duplicate_deliveries(true);
        respond_with(&bus, |id, n| {
            json!({ "correlationId": id.to_string(), "doubled": n * 2 })
        })
        .await;
        let client = RequestReplyClient::new(Arc::new(bus.clone()));

        let pong: Pong = client.call(&ROUTE, &Ping { n: 2 }).await.unwrap();
        assert_eq!(pong.doubled, 4);
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn listen_is_idempotent() {
        let bus = InMemoryBus::new();
        let client = RequestReplyClient::new(Arc::new(bus.clone()));

        client.listen(routes::ORDER_CREATE.response).await.unwrap();
        client.listen(routes::ORDER_CREATE.response).await.unwrap();

        assert_eq!(bus.subscriber_count(routes::ORDER_CREATE.response), 1);
    }

    #[tokio::test]
    async fn reply_without_correlation_id_is_discarded() {
        let bus = InMemoryBus::new();
        let client = RequestReplyClient::new(Arc::new(bus.clone()));
        client.listen(ROUTE.response).await.unwrap();

        bus.publish_json(ROUTE.response, &json!({ "doubled": 2 }))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert!(bus.dead_letters().is_empty());
    }
}
