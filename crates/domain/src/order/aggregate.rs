//! Order aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use common::{Money, OrderId, ProductId, ReservationId, SessionId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};

/// Days after the order date during which a delivered order may be refunded.
pub const REFUND_WINDOW_DAYS: i64 = 14;

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Card,
    Blik,
    P24,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::Blik => "BLIK",
            PaymentMethod::P24 => "P24",
        }
    }
}

/// A product line in an order, priced at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    #[serde(default)]
    pub rated: bool,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
            rated: false,
        }
    }

    pub fn total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Everything needed to persist a freshly checked-out order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub user_id: UserId,
    pub reservation_id: ReservationId,
    pub lines: Vec<OrderLine>,
    pub shipping_address: String,
    pub total_price: Money,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Order aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    reservation_id: ReservationId,
    lines: Vec<OrderLine>,
    status: OrderStatus,
    shipping_address: String,
    total_price: Money,
    payment_method: PaymentMethod,
    session_id: Option<SessionId>,
    order_date: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    delivery_date: Option<DateTime<Utc>>,
    email_sent: bool,
    // Delivered and past its one post-delivery progression roll.
    #[serde(default)]
    settled: bool,
}

impl Order {
    /// Validates and creates an order in `Created` status.
    pub fn create(new: NewOrder, now: DateTime<Utc>) -> Result<Self, OrderError> {
        if new.lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        if let Some(line) = new.lines.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id.clone(),
            });
        }
        let computed: Money = new.lines.iter().map(OrderLine::total).sum();
        if computed != new.total_price {
            return Err(OrderError::TotalMismatch {
                expected: computed,
                actual: new.total_price,
            });
        }

        Ok(Self {
            id: OrderId::new(),
            user_id: new.user_id,
            reservation_id: new.reservation_id,
            lines: new.lines,
            status: OrderStatus::Created,
            shipping_address: new.shipping_address,
            total_price: new.total_price,
            payment_method: new.payment_method,
            session_id: None,
            order_date: now,
            last_modified: now,
            delivery_date: None,
            email_sent: false,
            settled: false,
        })
    }

    /// Records the payment session opened for this order.
    ///
    /// Attaching the same session twice is a no-op.
    pub fn attach_session(&mut self, session_id: SessionId, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.session_id.as_ref() == Some(&session_id) {
            return Ok(());
        }
        if !self.status.can_mark_paid() {
            return Err(self.invalid("attach a payment session"));
        }
        self.session_id = Some(session_id);
        self.last_modified = now;
        Ok(())
    }

    /// Moves a `Created` order to `Processing`.
    ///
    /// Returns `false` if the order was already past `Created`, so a repeated
    /// payment confirmation changes nothing.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<bool, OrderError> {
        match self.status {
            OrderStatus::Created => {
                self.transition(OrderStatus::Processing, now)?;
                Ok(true)
            }
            OrderStatus::Annulled => Err(self.invalid("pay")),
            _ => Ok(false),
        }
    }

    /// Applies a progression step chosen by the reconciliation sweep.
    pub fn advance(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_progress() {
            return Err(self.invalid("progress"));
        }
        self.transition(next, now)
    }

    /// Cancels a `Created` or `Processing` order.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        self.transition(OrderStatus::Annulled, now)
    }

    /// Refunds a delivered order within the refund window.
    pub fn refund(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_refund() {
            return Err(self.invalid("refund"));
        }
        if now - self.order_date > Duration::days(REFUND_WINDOW_DAYS) {
            return Err(OrderError::RefundWindowClosed {
                order_id: self.id,
                days: REFUND_WINDOW_DAYS,
            });
        }
        self.transition(OrderStatus::Refunded, now)
    }

    /// Marks a delivered order as past its post-delivery progression roll.
    pub fn settle(&mut self) {
        self.settled = true;
    }

    /// Records that the delivery notification went out.
    pub fn mark_email_sent(&mut self) {
        self.email_sent = true;
    }

    fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.last_modified = now;
        if next == OrderStatus::Delivered {
            self.delivery_date = Some(now);
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidStateTransition {
            current_state: self.status,
            action,
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn reservation_id(&self) -> ReservationId {
        self.reservation_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Returns the ordered quantity per product.
    pub fn quantities(&self) -> BTreeMap<ProductId, u32> {
        self.lines
            .iter()
            .map(|l| (l.product_id.clone(), l.quantity))
            .collect()
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn delivery_date(&self) -> Option<DateTime<Utc>> {
        self.delivery_date
    }

    pub fn email_sent(&self) -> bool {
        self.email_sent
    }

    /// Returns true once the progression sweep no longer considers the order.
    pub fn is_settled(&self) -> bool {
        self.settled || self.is_terminal()
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_order(user: &str) -> NewOrder {
        NewOrder {
            user_id: UserId::new(user),
            reservation_id: ReservationId::new(),
            lines: vec![OrderLine::new("A", 2, Money::from_dollars(10))],
            shipping_address: "1 Main St".into(),
            total_price: Money::from_dollars(20),
            payment_method: PaymentMethod::Card,
        }
    }

    fn created() -> Order {
        Order::create(new_order("u1"), Utc::now()).unwrap()
    }

    #[test]
    fn test_create_order() {
        let order = created();
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.total_price(), Money::from_dollars(20));
        assert_eq!(order.quantities().get(&ProductId::new("A")), Some(&2));
        assert!(order.session_id().is_none());
        assert!(!order.email_sent());
    }

    #[test]
    fn test_create_rejects_empty_and_inconsistent_orders() {
        let mut empty = new_order("u1");
        empty.lines.clear();
        assert!(matches!(
            Order::create(empty, Utc::now()),
            Err(OrderError::NoLines)
        ));

        let mut wrong_total = new_order("u1");
        wrong_total.total_price = Money::from_dollars(1);
        assert!(matches!(
            Order::create(wrong_total, Utc::now()),
            Err(OrderError::TotalMismatch { .. })
        ));

        let mut zero = new_order("u1");
        zero.lines[0].quantity = 0;
        zero.total_price = Money::zero();
        assert!(matches!(
            Order::create(zero, Utc::now()),
            Err(OrderError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_mark_paid_is_idempotent() {
        let mut order = created();
        assert!(order.mark_paid(Utc::now()).unwrap());
        assert_eq!(order.status(), OrderStatus::Processing);
        assert!(!order.mark_paid(Utc::now()).unwrap());
        assert_eq!(order.status(), OrderStatus::Processing);
    }

    #[test]
    fn test_full_lifecycle_sets_delivery_date() {
        let mut order = created();
        let now = Utc::now();
        order.mark_paid(now).unwrap();
        order.advance(OrderStatus::Shipping, now).unwrap();
        assert!(order.delivery_date().is_none());
        order.advance(OrderStatus::Delivered, now).unwrap();
        assert_eq!(order.delivery_date(), Some(now));
        assert!(!order.is_settled());
        assert!(order.advance(OrderStatus::Annulled, now).is_err());
    }

    #[test]
    fn test_exceptional_progression_refunds_delivered() {
        let mut order = created();
        let now = Utc::now();
        order.mark_paid(now).unwrap();
        order.advance(OrderStatus::Shipping, now).unwrap();
        order.advance(OrderStatus::Delivered, now).unwrap();

        order.advance(OrderStatus::Refunded, now).unwrap();

        assert_eq!(order.status(), OrderStatus::Refunded);
        assert_eq!(order.delivery_date(), Some(now));
        assert!(order.is_settled());
    }

    #[test]
    fn test_exceptional_progression_annuls() {
        let mut order = created();
        order.mark_paid(Utc::now()).unwrap();
        order.advance(OrderStatus::Annulled, Utc::now()).unwrap();
        assert!(order.is_terminal());
    }

    #[test]
    fn test_cannot_skip_shipping() {
        let mut order = created();
        order.mark_paid(Utc::now()).unwrap();
        let err = order.advance(OrderStatus::Delivered, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Processing,
                to: OrderStatus::Delivered
            }
        ));
    }

    #[test]
    fn test_refund_window() {
        let ordered = Utc::now() - Duration::days(20);
        let mut order = Order::create(new_order("u1"), ordered).unwrap();
        order.mark_paid(ordered).unwrap();
        order.advance(OrderStatus::Shipping, ordered).unwrap();
        order.advance(OrderStatus::Delivered, ordered).unwrap();

        let late = order.clone().refund(Utc::now());
        assert!(matches!(late, Err(OrderError::RefundWindowClosed { .. })));

        order.refund(ordered + Duration::days(13)).unwrap();
        assert_eq!(order.status(), OrderStatus::Refunded);
    }

    #[test]
    fn test_refund_requires_delivery() {
        let mut order = created();
        assert!(order.refund(Utc::now()).is_err());
    }

    #[test]
    fn test_cancel() {
        let mut order = created();
        order.cancel(Utc::now()).unwrap();
        assert_eq!(order.status(), OrderStatus::Annulled);
        assert!(order.cancel(Utc::now()).is_err());
        assert!(order.mark_paid(Utc::now()).is_err());
    }

    #[test]
    fn test_attach_session() {
        let mut order = created();
        order.attach_session(SessionId::new("cs_1"), Utc::now()).unwrap();
        order.attach_session(SessionId::new("cs_1"), Utc::now()).unwrap();
        assert_eq!(order.session_id(), Some(&SessionId::new("cs_1")));

        order.mark_paid(Utc::now()).unwrap();
        assert!(order.attach_session(SessionId::new("cs_2"), Utc::now()).is_err());
    }
}
