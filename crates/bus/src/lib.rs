//! Publish/subscribe bus adapter.
//!
//! The bus itself is provided infrastructure; this crate only captures its
//! contract ([`MessageBus`]) and ships an in-memory implementation with the
//! same delivery guarantees: at-least-once, no ordering across topics, and
//! redelivery when a handler fails.

pub mod bus;
pub mod codec;
pub mod error;
pub mod memory;
pub mod message;
pub mod topics;

pub use bus::{HandlerError, MessageBus, MessageBusExt, MessageHandler, Subscription, handler_fn};
pub use error::{BusError, Result};
pub use memory::{InMemoryBus, InMemoryBusConfig};
pub use message::{Message, MessageId};
