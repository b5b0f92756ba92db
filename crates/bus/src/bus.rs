use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::task::AbortHandle;

use crate::{Message, Result};

/// Error returned by a message handler.
///
/// A handler error makes the bus redeliver the message.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback invoked once per delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles a delivered message.
    ///
    /// Handlers must tolerate duplicates: the bus delivers at least once.
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError>;
}

/// Core trait for the publish/subscribe bus.
///
/// `publish` acknowledges the hand-off, not the delivery. `subscribe` starts
/// a listener for one topic; every published message is delivered to every
/// subscription of that topic at least once, with no ordering guarantee
/// across topics.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes an opaque payload to a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Registers a handler for a topic.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>)
    -> Result<Subscription>;
}

/// Extension trait providing convenience methods for buses.
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Encodes a value as JSON and publishes it.
    async fn publish_json<T: Serialize + Sync>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = crate::codec::encode(value)?;
        self.publish(topic, payload).await
    }
}

impl<T: MessageBus + ?Sized> MessageBusExt for T {}

#[async_trait]
impl<B: MessageBus + ?Sized> MessageBus for Arc<B> {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        (**self).publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        (**self).subscribe(topic, handler).await
    }
}

/// Handle to an active subscription.
///
/// Dropping the handle leaves the listener running; call [`Subscription::cancel`]
/// to stop it.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    abort: Option<AbortHandle>,
}

impl Subscription {
    /// Creates a subscription handle backed by a listener task.
    pub fn new(topic: impl Into<String>, abort: AbortHandle) -> Self {
        Self {
            topic: topic.into(),
            abort: Some(abort),
        }
    }

    /// Creates a handle for a subscription with no local listener task.
    pub fn detached(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            abort: None,
        }
    }

    /// Returns the subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stops the listener.
    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: &Message) -> std::result::Result<(), HandlerError> {
        (self.f)(message.clone()).await
    }
}

/// Wraps an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _fut: PhantomData,
    })
}
