//! Order persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId, SessionId};

use super::{Order, OrderStatus};

/// Storage for orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts or replaces an order.
    async fn save(&self, order: Order);

    async fn get(&self, id: OrderId) -> Option<Order>;

    async fn find_by_session(&self, session_id: &SessionId) -> Option<Order>;

    async fn find_by_reservation(&self, reservation_id: ReservationId) -> Option<Order>;

    /// Removes an order; returns the removed order if it existed.
    async fn delete(&self, id: OrderId) -> Option<Order>;

    /// Orders in one of `statuses` last modified before `cutoff`.
    async fn stale(&self, statuses: &[OrderStatus], cutoff: DateTime<Utc>) -> Vec<Order>;

    /// Delivered orders whose notification has not been sent yet.
    async fn delivered_without_email(&self) -> Vec<Order>;
}

/// In-memory order repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns every stored order.
    pub fn all(&self) -> Vec<Order> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<OrderId, Order>> {
        self.orders.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<OrderId, Order>> {
        self.orders.write().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, predicate: impl Fn(&Order) -> bool) -> Option<Order> {
        self.read().values().find(|o| predicate(o)).cloned()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: Order) {
        self.write().insert(order.id(), order);
    }

    async fn get(&self, id: OrderId) -> Option<Order> {
        self.read().get(&id).cloned()
    }

    async fn find_by_session(&self, session_id: &SessionId) -> Option<Order> {
        self.find(|o| o.session_id() == Some(session_id))
    }

    async fn find_by_reservation(&self, reservation_id: ReservationId) -> Option<Order> {
        self.find(|o| o.reservation_id() == reservation_id)
    }

    async fn delete(&self, id: OrderId) -> Option<Order> {
        self.write().remove(&id)
    }

    async fn stale(&self, statuses: &[OrderStatus], cutoff: DateTime<Utc>) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .read()
            .values()
            .filter(|o| statuses.contains(&o.status()) && o.last_modified() < cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(Order::last_modified);
        orders
    }

    async fn delivered_without_email(&self) -> Vec<Order> {
        self.read()
            .values()
            .filter(|o| o.status() == OrderStatus::Delivered && !o.email_sent())
            .cloned()
            .collect()
    }
}
