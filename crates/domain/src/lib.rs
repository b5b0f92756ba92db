//! Shop domain layer.
//!
//! This crate holds the state owned by each participant of the checkout:
//! - Order aggregate with its status machine, repository and service
//! - Carts with the order-processing lock
//! - Product catalog with an idempotent stock reservation ledger
//!
//! Nothing here talks to the bus; the saga crate wires these into
//! request handlers.

pub mod cart;
pub mod catalog;
pub mod order;

pub use cart::{Cart, CartError, CartStore};
pub use catalog::{Catalog, CatalogError, Pricing, Product, Reservation};
pub use order::{
    FixedProgression, InMemoryOrderRepository, NewOrder, Order, OrderError, OrderLine,
    OrderRepository, OrderService, OrderStatus, PaymentMethod, ProgressionOutcome,
    REFUND_WINDOW_DAYS, RandomProgression, RepaymentInfo, StatusProgression,
};
