//! Background reconciliation run by the order owner.
//!
//! Each pass:
//! - moves paid orders along their fulfilment path through the
//!   [`StatusProgression`] hook, giving stock back when one is annulled
//! - deletes orders left unpaid past the grace period, then unlocks their stock
//! - announces delivered orders on `order-delivered` once

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bus::{MessageBus, MessageBusExt, topics};
use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId, UserId};
use domain::{Order, OrderError, OrderRepository, OrderService, OrderStatus, StatusProgression};
use rpc::{RequestReplyClient, RetryPolicy, RpcError, retry_with_backoff, routes};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::messages::{OrderDelivered, StockReleased, UnlockRequest};

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Pause between passes.
    pub interval: Duration,
    /// How long a paid order rests in one status before it moves on.
    pub progression_age: Duration,
    /// How long an order may stay unpaid before it is abandoned.
    pub unpaid_grace: Duration,
    /// Deadline for one stock unlock request.
    pub request_timeout: Duration,
    /// Retries for one stock unlock within a pass.
    pub unlock_policy: RetryPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            progression_age: Duration::from_secs(2 * 24 * 60 * 60),
            unpaid_grace: Duration::from_secs(24 * 60 * 60),
            request_timeout: rpc::route::DEFAULT_TIMEOUT,
            unlock_policy: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(100))
                .build(),
        }
    }
}

/// What one pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orders moved one status along, annulments included.
    pub progressed: usize,
    /// Orders annulled in transit.
    pub annulled: usize,
    /// Delivered orders refunded by the progression hook.
    pub refunded: usize,
    /// Unpaid orders deleted.
    pub abandoned: usize,
    /// Delivery notifications published.
    pub notified: usize,
    /// Stock unlocks still waiting for an acknowledgement.
    pub pending_unlocks: usize,
}

/// Order owner's background worker.
pub struct Reconciler<R: OrderRepository> {
    orders: Arc<OrderService<R>>,
    client: RequestReplyClient,
    bus: Arc<dyn MessageBus>,
    progression: Arc<dyn StatusProgression>,
    config: ReconcileConfig,
    // Unlocks of annulled or abandoned orders not acknowledged yet.
    pending_unlocks: Mutex<Vec<ReservationId>>,
}

impl<R: OrderRepository + 'static> Reconciler<R> {
    pub fn new(
        orders: Arc<OrderService<R>>,
        client: RequestReplyClient,
        bus: Arc<dyn MessageBus>,
        progression: Arc<dyn StatusProgression>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            orders,
            client,
            bus,
            progression,
            config,
            pending_unlocks: Mutex::new(Vec::new()),
        }
    }

    /// Runs one pass against the current time.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        self.reconcile_at(Utc::now()).await
    }

    /// Runs one pass as if the time were `now`.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.retry_pending_unlocks().await;
        self.progress(now, &mut report).await;
        self.abandon_unpaid(now, &mut report).await;
        self.notify_delivered(&mut report).await;
        report.pending_unlocks = self.pending().len();

        let changed = report.progressed + report.abandoned + report.notified;
        if changed > 0 {
            metrics::counter!("orders_reconciled_total").increment(changed as u64);
            tracing::info!(?report, "Reconciliation pass finished");
        }
        report
    }

    /// Annuls an order on the customer's or an admin's request.
    ///
    /// The order is annulled first; its stock is then given back, or queued
    /// for the next pass if the catalog does not acknowledge.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId, user_id: &UserId) -> Result<Order> {
        let order = self.orders.get(order_id).await?;
        if order.user_id() != user_id {
            return Err(OrderError::NotOwner(order_id).into());
        }
        let order = self.orders.cancel(order_id).await?;
        self.release(&order).await;
        Ok(order)
    }

    /// Runs passes every `interval` until `shutdown` turns true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(interval = ?self.config.interval, "Order reconciliation started");
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = tick.tick() => {
                        self.reconcile_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Order reconciliation stopped");
        })
    }

    async fn progress(&self, now: DateTime<Utc>, report: &mut ReconcileReport) {
        let cutoff = before(now, self.config.progression_age);
        let moved = self
            .orders
            .progress_due(self.progression.as_ref(), cutoff, now)
            .await;

        for outcome in moved {
            report.progressed += 1;
            match outcome.to {
                OrderStatus::Annulled => {
                    report.annulled += 1;
                    self.release(&outcome.order).await;
                }
                OrderStatus::Refunded => report.refunded += 1,
                _ => {}
            }
        }
    }

    async fn abandon_unpaid(&self, now: DateTime<Utc>, report: &mut ReconcileReport) {
        let cutoff = before(now, self.config.unpaid_grace);
        for order in self.orders.unpaid_before(cutoff).await {
            let order_id = order.id();
            match self.orders.abandon(order_id, cutoff).await {
                Ok(Some(deleted)) => {
                    report.abandoned += 1;
                    tracing::info!(%order_id, "Unpaid order abandoned");
                    self.release(&deleted).await;
                }
                // Paid or re-opened since the listing.
                Ok(None) => {}
                Err(e) => tracing::warn!(%order_id, error = %e, "Unpaid order not abandoned"),
            }
        }
    }

    async fn notify_delivered(&self, report: &mut ReconcileReport) {
        for order in self.orders.delivered_pending_email().await {
            let event = OrderDelivered {
                order_id: order.id(),
                user_id: order.user_id().clone(),
                total_price: order.total_price(),
                delivery_date: order.delivery_date(),
            };
            if let Err(e) = self.bus.publish_json(topics::ORDER_DELIVERED, &event).await {
                tracing::warn!(order_id = %order.id(), error = %e, "Delivery notification deferred");
                continue;
            }
            match self.orders.mark_email_sent(order.id()).await {
                Ok(_) => report.notified += 1,
                Err(e) => tracing::warn!(order_id = %order.id(), error = %e, "Could not mark notification sent"),
            }
        }
    }

    /// Gives an order's stock back, queueing the unlock if it is not acknowledged.
    async fn release(&self, order: &Order) {
        let reservation_id = order.reservation_id();
        if let Err(e) = self.unlock(reservation_id).await {
            tracing::warn!(order_id = %order.id(), error = %e, "Unlock deferred");
            self.pending().push(reservation_id);
        }
    }

    async fn retry_pending_unlocks(&self) {
        let pending = std::mem::take(&mut *self.pending());
        for reservation_id in pending {
            if let Err(e) = self.unlock(reservation_id).await {
                tracing::warn!(%reservation_id, error = %e, "Unlock still pending");
                self.pending().push(reservation_id);
            }
        }
    }

    async fn unlock(&self, reservation_id: ReservationId) -> std::result::Result<(), RpcError> {
        let route = routes::ORDER_PRODUCT_UNLOCK.with_timeout(self.config.request_timeout);
        let request = UnlockRequest { reservation_id };
        let released: StockReleased = retry_with_backoff(
            &self.config.unlock_policy,
            RpcError::is_retryable,
            || self.client.call(&route, &request),
        )
        .await?;
        tracing::debug!(%reservation_id, restored = released.restored, "Stock unlocked");
        Ok(())
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Vec<ReservationId>> {
        self.pending_unlocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `now` minus `age`, clamped to the earliest representable time.
fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
