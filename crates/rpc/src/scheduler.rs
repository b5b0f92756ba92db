use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use common::CorrelationId;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::CorrelationRegistry;

/// A single task that expires pending requests when their deadlines pass.
///
/// Deadlines are kept in a min-heap; the task sleeps until the earliest one.
/// Entries resolved in the meantime are skipped because `expire` on an
/// absent id is a no-op. The task stops once every scheduler handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct DeadlineScheduler {
    sender: mpsc::UnboundedSender<(Instant, CorrelationId)>,
    registry: Arc<CorrelationRegistry>,
}

impl DeadlineScheduler {
    /// Spawns the scheduler task on the current runtime.
    pub fn spawn(registry: Arc<CorrelationRegistry>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(registry.clone(), receiver));
        Self { sender, registry }
    }

    /// Arms the deadline for a pending request.
    pub fn schedule(&self, correlation_id: CorrelationId, deadline: Instant) {
        if self.sender.send((deadline, correlation_id)).is_err() {
            // Scheduler task is gone; fail the request now rather than hang.
            tracing::error!(%correlation_id, "Deadline scheduler stopped");
            self.registry.expire(&correlation_id);
        }
    }
}

async fn run(
    registry: Arc<CorrelationRegistry>,
    mut receiver: mpsc::UnboundedReceiver<(Instant, CorrelationId)>,
) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, CorrelationId)>> = BinaryHeap::new();

    loop {
        let next = deadlines.peek().map(|Reverse((deadline, _))| *deadline);
        let wake_at = next.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            armed = receiver.recv() => match armed {
                Some(entry) => deadlines.push(Reverse(entry)),
                None => break,
            },
            _ = sleep_until(wake_at), if next.is_some() => {
                let now = Instant::now();
                while let Some(Reverse((deadline, _))) = deadlines.peek() {
                    if *deadline > now {
                        break;
                    }
                    let Some(Reverse((_, correlation_id))) = deadlines.pop() else {
                        break;
                    };
                    if registry.expire(&correlation_id) {
                        metrics::counter!("rpc_timeouts_total").increment(1);
                    }
                }
            }
        }
    }

    tracing::debug!(remaining = deadlines.len(), "Deadline scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcError;

    #[tokio::test(start_paused = true)]
    async fn expires_request_at_deadline() {
        let registry = Arc::new(CorrelationRegistry::new());
        let scheduler = DeadlineScheduler::spawn(registry.clone());

        let id = CorrelationId::new();
        let start = Instant::now();
        let deadline = start + Duration::from_secs(5);
        let handle = registry.register(id, "req", deadline).unwrap();
        scheduler.schedule(id, deadline);

        let outcome = handle.wait().await;
        assert!(matches!(outcome, Err(RpcError::Timeout { .. })));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
        assert!(!registry.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_fires_first() {
        let registry = Arc::new(CorrelationRegistry::new());
        let scheduler = DeadlineScheduler::spawn(registry.clone());
        let now = Instant::now();

        let slow = CorrelationId::new();
        let fast = CorrelationId::new();
        let slow_handle = registry
            .register(slow, "slow", now + Duration::from_secs(10))
            .unwrap();
        let fast_handle = registry
            .register(fast, "fast", now + Duration::from_secs(2))
            .unwrap();
        scheduler.schedule(slow, now + Duration::from_secs(10));
        scheduler.schedule(fast, now + Duration::from_secs(2));

        assert!(fast_handle.wait().await.is_err());
        assert!(now.elapsed() < Duration::from_secs(3));
        assert!(registry.contains(&slow));

        assert!(slow_handle.wait().await.is_err());
        assert!(now.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_request_is_not_expired() {
        let registry = Arc::new(CorrelationRegistry::new());
        let scheduler = DeadlineScheduler::spawn(registry.clone());

        let id = CorrelationId::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        let handle = registry.register(id, "req", deadline).unwrap();
        scheduler.schedule(id, deadline);

        assert!(registry.resolve(&id, Ok(serde_json::json!(7))));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(handle.wait().await.unwrap(), serde_json::json!(7));
    }
}
