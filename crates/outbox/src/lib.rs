//! Reliable publication of fire-and-forget events.
//!
//! An event is written to the outbox in the same transaction as the state
//! change that caused it. A background [`OutboxPublisher`] sweeps un-sent
//! records onto the bus and marks them sent; a record that fails to publish
//! stays un-sent and is retried on the next sweep. Consumers may therefore
//! see an event more than once, but never miss one.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod record;
pub mod store;

pub use error::{OutboxError, Result};
pub use memory::{InMemoryOutboxStore, OutboxTransaction};
pub use postgres::PostgresOutboxStore;
pub use publisher::{OutboxConfig, OutboxPublisher};
pub use record::{OutboxId, OutboxRecord};
pub use store::{Dispatch, DispatchReport, OutboxStore, OutboxStoreExt};
