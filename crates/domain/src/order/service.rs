//! Order service: the order owner's operations.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{
    NewOrder, Order, OrderError, OrderRepository, OrderStatus, PaymentMethod, StatusProgression,
};

/// What the payment side needs to open a new session for an unpaid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentInfo {
    pub order_id: OrderId,
    pub total_price: Money,
    pub payment_method: PaymentMethod,
}

/// A status change applied by the progression sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionOutcome {
    pub order: Order,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Service for managing orders.
///
/// Mutations are serialized so that a read-modify-write of one order never
/// interleaves with another.
pub struct OrderService<R: OrderRepository> {
    repository: R,
    writes: Mutex<()>,
}

impl<R: OrderRepository> OrderService<R> {
    /// Creates a new order service over the given repository.
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            writes: Mutex::new(()),
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub async fn get(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.repository
            .get(order_id)
            .await
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Persists a new order in `Created` status.
    ///
    /// An order for the same reservation is returned as is, so a redelivered
    /// create request does not produce a second order.
    #[tracing::instrument(skip(self, new), fields(user_id = %new.user_id, reservation_id = %new.reservation_id))]
    pub async fn create(&self, new: NewOrder) -> Result<Order, OrderError> {
        let _guard = self.writes.lock().await;

        if let Some(existing) = self.repository.find_by_reservation(new.reservation_id).await {
            tracing::debug!(order_id = %existing.id(), "Order already exists for reservation");
            return Ok(existing);
        }

        let order = Order::create(new, Utc::now())?;
        self.repository.save(order.clone()).await;
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id(), total = %order.total_price(), "Order created");
        Ok(order)
    }

    /// Stores the payment session id on an unpaid order.
    #[tracing::instrument(skip(self))]
    pub async fn attach_session(
        &self,
        order_id: OrderId,
        session_id: SessionId,
    ) -> Result<Order, OrderError> {
        self.mutate(order_id, |order| order.attach_session(session_id, Utc::now()))
            .await
    }

    /// Applies a payment confirmation.
    ///
    /// Returns `Ok(None)` if no order carries the session or the order was
    /// already paid; duplicates are expected from at-least-once delivery.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Order>, OrderError> {
        let _guard = self.writes.lock().await;

        let Some(mut order) = self.repository.find_by_session(session_id).await else {
            tracing::warn!("Payment confirmation for unknown session");
            return Ok(None);
        };
        if !order.mark_paid(Utc::now())? {
            tracing::debug!(order_id = %order.id(), "Duplicate payment confirmation ignored");
            return Ok(None);
        }
        self.repository.save(order.clone()).await;
        tracing::info!(order_id = %order.id(), "Order paid");
        Ok(Some(order))
    }

    /// Looks up what is needed to pay an abandoned order again.
    pub async fn repayment_info(
        &self,
        order_id: OrderId,
        user_id: &UserId,
    ) -> Result<RepaymentInfo, OrderError> {
        let order = self.get(order_id).await?;
        if order.user_id() != user_id {
            return Err(OrderError::NotOwner(order_id));
        }
        if !order.status().can_mark_paid() {
            return Err(OrderError::InvalidStateTransition {
                current_state: order.status(),
                action: "repay",
            });
        }
        Ok(RepaymentInfo {
            order_id,
            total_price: order.total_price(),
            payment_method: order.payment_method(),
        })
    }

    /// Annuls an order. Stock must already be released by the caller.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.mutate(order_id, |order| order.cancel(Utc::now())).await
    }

    /// Refunds a delivered order.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Order, OrderError> {
        self.mutate(order_id, |order| order.refund(now)).await
    }

    /// Deletes an unpaid order.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let _guard = self.writes.lock().await;

        let order = self
            .repository
            .get(order_id)
            .await
            .ok_or(OrderError::NotFound(order_id))?;
        if !order.status().can_delete() {
            return Err(OrderError::InvalidStateTransition {
                current_state: order.status(),
                action: "delete",
            });
        }
        self.repository.delete(order_id).await;
        tracing::info!("Order deleted");
        Ok(order)
    }

    /// Deletes an order that is still unpaid and untouched since `cutoff`.
    ///
    /// Returns `Ok(None)` when the order was paid or re-opened for payment in
    /// the meantime. The check and the delete happen under the write lock, so
    /// a concurrent payment either lands first or finds no order.
    #[tracing::instrument(skip(self))]
    pub async fn abandon(
        &self,
        order_id: OrderId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Order>, OrderError> {
        let _guard = self.writes.lock().await;

        let order = self
            .repository
            .get(order_id)
            .await
            .ok_or(OrderError::NotFound(order_id))?;
        if !order.status().can_delete() || order.last_modified() >= cutoff {
            return Ok(None);
        }
        self.repository.delete(order_id).await;
        tracing::info!("Unpaid order deleted");
        Ok(Some(order))
    }

    /// Moves every order idle since before `cutoff` one step along.
    ///
    /// Delivered orders are rolled once; whatever the outcome they are
    /// settled afterwards.
    pub async fn progress_due(
        &self,
        progression: &dyn StatusProgression,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<ProgressionOutcome> {
        let _guard = self.writes.lock().await;

        let due = self
            .repository
            .stale(
                &[OrderStatus::Processing, OrderStatus::Shipping, OrderStatus::Delivered],
                cutoff,
            )
            .await;

        let mut outcomes = Vec::new();
        for mut order in due.into_iter().filter(|o| !o.is_settled()) {
            let from = order.status();
            let next = progression.next(from);
            if from == OrderStatus::Delivered {
                // Delivered orders get a single roll.
                order.settle();
            }
            let Some(to) = next else {
                if from == OrderStatus::Delivered {
                    self.repository.save(order).await;
                }
                continue;
            };
            if let Err(e) = order.advance(to, now) {
                tracing::warn!(order_id = %order.id(), error = %e, "Skipping progression");
                continue;
            }
            self.repository.save(order.clone()).await;
            tracing::info!(order_id = %order.id(), %from, %to, "Order progressed");
            outcomes.push(ProgressionOutcome { order, from, to });
        }
        outcomes
    }

    /// Unpaid orders created before `cutoff`.
    pub async fn unpaid_before(&self, cutoff: DateTime<Utc>) -> Vec<Order> {
        self.repository.stale(&[OrderStatus::Created], cutoff).await
    }

    /// Delivered orders whose notification is still pending.
    pub async fn delivered_pending_email(&self) -> Vec<Order> {
        self.repository.delivered_without_email().await
    }

    pub async fn mark_email_sent(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.mutate(order_id, |order| {
            order.mark_email_sent();
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, order_id: OrderId, f: F) -> Result<Order, OrderError>
    where
        F: FnOnce(&mut Order) -> Result<(), OrderError>,
    {
        let _guard = self.writes.lock().await;

        let mut order = self
            .repository
            .get(order_id)
            .await
            .ok_or(OrderError::NotFound(order_id))?;
        f(&mut order)?;
        self.repository.save(order.clone()).await;
        Ok(order)
    }
}
