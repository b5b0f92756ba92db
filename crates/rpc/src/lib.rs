//! Correlation-based request/reply layered over a one-way bus.
//!
//! A caller publishes a request carrying a fresh [`CorrelationId`] and
//! suspends until a reply with the same id arrives on the response topic, or
//! until its deadline passes. The pieces:
//!
//! - [`CorrelationRegistry`]: pending requests keyed by correlation id, the
//!   single point of truth for "is this reply still wanted"
//! - [`DeadlineScheduler`]: one shared task expiring overdue requests
//! - [`RequestReplyClient`]: issues calls and routes replies back
//! - [`serve`]: answers requests on behalf of an owning service
//!
//! [`CorrelationId`]: common::CorrelationId

pub mod client;
pub mod envelope;
pub mod error;
pub mod policy;
pub mod registry;
pub mod responder;
pub mod route;
pub mod scheduler;

pub use client::RequestReplyClient;
pub use envelope::{ReplyEnvelope, RequestEnvelope};
pub use error::{Result, RpcError};
pub use policy::{RetryPolicy, retry_with_backoff};
pub use registry::{CorrelationRegistry, PendingHandle, ReplyOutcome};
pub use responder::{Rejection, RequestHandler, serve};
pub use route::{Route, routes};
pub use scheduler::DeadlineScheduler;
