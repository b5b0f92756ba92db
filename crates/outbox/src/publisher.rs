use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use bus::MessageBus;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{Dispatch, DispatchReport, OutboxRecord, OutboxStore, Result};

/// Sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Pause between sweeps.
    pub sweep_interval: Duration,
    /// Maximum records published per sweep.
    pub batch_size: usize,
    /// Sent records older than this are deleted.
    pub retention: Duration,
    /// Pause between retention passes.
    pub purge_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            batch_size: 100,
            retention: Duration::from_secs(48 * 60 * 60),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Publishes outbox records to the bus.
pub struct OutboxPublisher<S: OutboxStore> {
    store: Arc<S>,
    bus: Arc<dyn MessageBus>,
    config: OutboxConfig,
}

impl<S: OutboxStore + 'static> OutboxPublisher<S> {
    pub fn new(store: Arc<S>, bus: Arc<dyn MessageBus>, config: OutboxConfig) -> Self {
        Self { store, bus, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Publishes one batch of un-sent records.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<DispatchReport> {
        let sink = BusDispatch {
            bus: self.bus.as_ref(),
        };
        let report = self
            .store
            .dispatch_unsent(self.config.batch_size, &sink)
            .await?;

        if !report.is_empty() {
            tracing::debug!(
                published = report.published,
                failed = report.failed,
                "Outbox sweep finished"
            );
        }
        metrics::counter!("outbox_published_total").increment(report.published as u64);
        metrics::counter!("outbox_publish_failures_total").increment(report.failed as u64);
        Ok(report)
    }

    /// Deletes sent records older than the retention horizon.
    #[tracing::instrument(skip(self))]
    pub async fn purge_once(&self) -> Result<u64> {
        let horizon =
            chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(horizon)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let purged = self.store.purge_sent_before(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged sent outbox records");
        }
        metrics::counter!("outbox_purged_total").increment(purged);
        Ok(purged)
    }

    /// Runs sweeps and retention passes until `shutdown` turns true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(self.config.sweep_interval);
            let mut purge = tokio::time::interval(self.config.purge_interval);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(
                interval = ?self.config.sweep_interval,
                "Outbox publisher started"
            );
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = sweep.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::error!(error = %e, "Outbox sweep failed");
                        }
                    }
                    _ = purge.tick() => {
                        if let Err(e) = self.purge_once().await {
                            tracing::error!(error = %e, "Outbox purge failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Outbox publisher stopped");
        })
    }
}

struct BusDispatch<'a> {
    bus: &'a dyn MessageBus,
}

#[async_trait]
impl Dispatch for BusDispatch<'_> {
    async fn dispatch(&self, record: &OutboxRecord) -> std::result::Result<(), String> {
        self.bus
            .publish(&record.topic, Bytes::from(record.payload.clone()))
            .await
            .map_err(|e| e.to_string())
    }
}
