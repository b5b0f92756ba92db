//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Created ──paid──► Processing ──► Shipping ──► Delivered ──refund/exceptional──► Refunded
///    │                  │             │
///    │                  └─────────────┴──exceptional──► Annulled
///    └──cancel──► Annulled
/// ```
///
/// Unpaid `Created` orders may also be deleted outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order persisted, awaiting payment.
    #[default]
    Created,

    /// Payment confirmed.
    Processing,

    /// Handed to the carrier.
    Shipping,

    /// Received by the customer.
    Delivered,

    /// Cancelled or lost in transit (terminal state).
    Annulled,

    /// Money returned after delivery (terminal state).
    Refunded,
}

impl OrderStatus {
    /// Returns true if a payment confirmation moves the order forward.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::Created)
    }

    /// Returns true if the background progression may advance the order.
    pub fn can_progress(&self) -> bool {
        matches!(
            self,
            OrderStatus::Processing | OrderStatus::Shipping | OrderStatus::Delivered
        )
    }

    /// Returns true if the customer or an admin may cancel the order.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Created | OrderStatus::Processing)
    }

    /// Returns true if the order may be refunded.
    pub fn can_refund(&self) -> bool {
        matches!(self, OrderStatus::Delivered)
    }

    /// Returns true if the order may be deleted.
    pub fn can_delete(&self) -> bool {
        matches!(self, OrderStatus::Created)
    }

    /// Returns true if the order's stock is still held by the catalog.
    pub fn holds_stock(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created | OrderStatus::Processing | OrderStatus::Shipping
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Annulled | OrderStatus::Refunded)
    }

    /// The regular next status, if the order moves on its own.
    pub fn next_regular(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Processing => Some(OrderStatus::Shipping),
            OrderStatus::Shipping => Some(OrderStatus::Delivered),
            _ => None,
        }
    }

    /// The exceptional outcome of a progression roll.
    pub fn next_exceptional(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Processing | OrderStatus::Shipping => Some(OrderStatus::Annulled),
            OrderStatus::Delivered => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, Processing)
                | (Created, Annulled)
                | (Processing, Shipping)
                | (Processing, Annulled)
                | (Shipping, Delivered)
                | (Shipping, Annulled)
                | (Delivered, Refunded)
        )
    }

    /// Returns the status name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipping => "SHIPPING",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Annulled => "ANNULLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
