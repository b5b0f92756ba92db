//! Owner-side services answering the checkout's requests.
//!
//! Each participant owns its state and exposes it only through request
//! handlers served on the bus, so the checkout never touches another
//! service's data directly.

pub mod account;
pub mod cart;
pub mod catalog;
pub mod notification;
pub mod order;
pub mod payment;

use std::fmt::Display;

use rpc::Rejection;

/// Turns an owner-side error into the message sent back to the caller.
fn reject(error: impl Display) -> Rejection {
    Rejection::new(error.to_string())
}
