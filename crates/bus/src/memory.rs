use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::bus::{MessageBus, MessageHandler, Subscription};
use crate::{BusError, Message, Result};

/// Delivery settings for [`InMemoryBus`].
#[derive(Debug, Clone)]
pub struct InMemoryBusConfig {
    /// Maximum deliveries of one message to one subscriber before it is dead-lettered.
    pub max_deliveries: u32,
    /// Pause before redelivering a message whose handler failed.
    pub redelivery_delay: Duration,
}

impl Default for InMemoryBusConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            redelivery_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Default)]
struct Faults {
    fail_next_publishes: AtomicUsize,
    failing_topics: RwLock<HashSet<String>>,
    duplicate_deliveries: AtomicBool,
}

struct Inner {
    config: InMemoryBusConfig,
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<Message>>>,
    published: RwLock<Vec<Message>>,
    dead_letters: RwLock<Vec<Message>>,
    faults: Faults,
}

/// In-memory bus for tests and single-process deployments.
///
/// Each subscription gets its own listener task fed by an unbounded channel,
/// so a slow handler never stalls publishers or other subscriptions. A
/// handler error triggers redelivery up to `max_deliveries` times.
///
/// Fault injection helpers (`fail_next_publishes`, `fail_topic`,
/// `set_duplicate_deliveries`) emulate a misbehaving broker.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Creates a bus with default delivery settings.
    pub fn new() -> Self {
        Self::with_config(InMemoryBusConfig::default())
    }

    /// Creates a bus with custom delivery settings.
    pub fn with_config(config: InMemoryBusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                subscribers: DashMap::new(),
                published: RwLock::new(Vec::new()),
                dead_letters: RwLock::new(Vec::new()),
                faults: Faults::default(),
            }),
        }
    }

    /// Makes the next `n` publishes fail synchronously.
    pub fn fail_next_publishes(&self, n: usize) {
        self.inner
            .faults
            .fail_next_publishes
            .store(n, Ordering::SeqCst);
    }

    /// Makes every publish to `topic` fail until [`InMemoryBus::heal_topic`] is called.
    pub fn fail_topic(&self, topic: &str) {
        if let Ok(mut topics) = self.inner.faults.failing_topics.write() {
            topics.insert(topic.to_string());
        }
    }

    /// Stops failing publishes to `topic`.
    pub fn heal_topic(&self, topic: &str) {
        if let Ok(mut topics) = self.inner.faults.failing_topics.write() {
            topics.remove(topic);
        }
    }

    /// When enabled, every published message is delivered twice to each subscriber.
    pub fn set_duplicate_deliveries(&self, enabled: bool) {
        self.inner
            .faults
            .duplicate_deliveries
            .store(enabled, Ordering::SeqCst);
    }

    /// Returns every message accepted for a topic, in publish order.
    pub fn published(&self, topic: &str) -> Vec<Message> {
        self.inner
            .published
            .read()
            .map(|log| log.iter().filter(|m| m.topic == topic).cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of messages accepted for a topic.
    pub fn published_count(&self, topic: &str) -> usize {
        self.published(topic).len()
    }

    /// Returns messages whose handler kept failing after every redelivery.
    pub fn dead_letters(&self) -> Vec<Message> {
        self.inner
            .dead_letters
            .read()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Returns the number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn check_faults(&self, topic: &str) -> Result<()> {
        let faults = &self.inner.faults;
        let injected = faults
            .fail_next_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BusError::PublishFailed {
                topic: topic.to_string(),
                reason: "injected publish failure".to_string(),
            });
        }

        let topic_down = faults
            .failing_topics
            .read()
            .map(|topics| topics.contains(topic))
            .unwrap_or(false);
        if topic_down {
            return Err(BusError::PublishFailed {
                topic: topic.to_string(),
                reason: "topic unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.check_faults(topic)?;

        let message = Message::new(topic, payload);
        if let Ok(mut log) = self.inner.published.write() {
            log.push(message.clone());
        }

        let copies = if self.inner.faults.duplicate_deliveries.load(Ordering::SeqCst) {
            2
        } else {
            1
        };

        if let Some(mut subs) = self.inner.subscribers.get_mut(topic) {
            subs.retain(|tx| !tx.is_closed());
            for tx in subs.iter() {
                for _ in 0..copies {
                    // A closed receiver means the listener was cancelled between
                    // the retain and the send; nothing else to do.
                    let _ = tx.send(message.clone());
                }
            }
        }

        metrics::counter!("bus_messages_published_total").increment(1);
        tracing::trace!(%topic, message_id = %message.id, "message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.inner
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        let inner = Arc::clone(&self.inner);
        let topic_name = topic.to_string();
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                deliver(&inner, handler.as_ref(), message).await;
            }
            tracing::debug!(topic = %topic_name, "listener stopped");
        });

        tracing::debug!(%topic, "subscription registered");
        Ok(Subscription::new(topic, task.abort_handle()))
    }
}

async fn deliver(inner: &Inner, handler: &dyn MessageHandler, mut message: Message) {
    loop {
        match handler.handle(&message).await {
            Ok(()) => return,
            Err(e) if message.attempt < inner.config.max_deliveries => {
                tracing::warn!(
                    topic = %message.topic,
                    message_id = %message.id,
                    attempt = message.attempt,
                    error = %e,
                    "handler failed, redelivering"
                );
                metrics::counter!("bus_redeliveries_total").increment(1);
                tokio::time::sleep(inner.config.redelivery_delay).await;
                message = message.redelivery();
            }
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    message_id = %message.id,
                    attempt = message.attempt,
                    error = %e,
                    "handler failed, giving up"
                );
                metrics::counter!("bus_dead_letters_total").increment(1);
                if let Ok(mut dead) = inner.dead_letters.write() {
                    dead.push(message);
                }
                return;
            }
        }
    }
}
