//! Order aggregate and related types.

mod aggregate;
mod progression;
mod repository;
mod service;
mod status;

pub use aggregate::{NewOrder, Order, OrderLine, PaymentMethod, REFUND_WINDOW_DAYS};
pub use progression::{FixedProgression, RandomProgression, StatusProgression};
pub use repository::{InMemoryOrderRepository, OrderRepository};
pub use service::{OrderService, ProgressionOutcome, RepaymentInfo};
pub use status::OrderStatus;

use common::{Money, OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// The transition is not in the status table.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Order has no lines.
    #[error("Order has no products")]
    NoLines,

    /// A line has zero quantity.
    #[error("Invalid quantity for product {product_id}")]
    InvalidQuantity { product_id: ProductId },

    /// The stated total does not match the lines.
    #[error("Order total {actual} does not match products total {expected}")]
    TotalMismatch { expected: Money, actual: Money },

    /// Refund requested after the refund window.
    #[error("Order {order_id} can only be refunded within {days} days")]
    RefundWindowClosed { order_id: OrderId, days: i64 },

    /// Order not found.
    #[error("Order not found.")]
    NotFound(OrderId),

    /// The order belongs to someone else.
    #[error("Order {0} does not belong to this user")]
    NotOwner(OrderId),
}
