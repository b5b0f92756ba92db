//! Shared identifiers and value types used across the shop services.

mod ids;
mod money;

pub use ids::{CorrelationId, OrderId, ProductId, ReservationId, SessionId, UserId};
pub use money::Money;
