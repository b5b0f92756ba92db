//! Checkout saga and the shop services taking part in it.
//!
//! The checkout turns a cart into an unpaid order with an open payment
//! session by asking each owning service in turn over request/reply:
//! 1. Lock the cart
//! 2. Reserve and price the products
//! 3. Create the order
//! 4. Open and attach a payment session
//! 5. Clear the cart
//!
//! If any step fails, previously completed steps are compensated in reverse
//! order. Payment completes later through the provider webhook and the
//! outbox; the order owner's [`Reconciler`] moves paid orders along and
//! cleans up abandoned ones.

pub mod checkout;
pub mod error;
pub mod messages;
pub mod participants;
pub mod reconciliation;
pub mod runner;
pub mod state;

pub use checkout::{Checkout, CheckoutConfig, CheckoutContext, CheckoutReceipt, CheckoutRequest};
pub use error::{Result, SERVICE_UNAVAILABLE, SagaError, StepError};
pub use participants::account::{AccountError, AccountService};
pub use participants::cart::serve_cart;
pub use participants::catalog::serve_catalog;
pub use participants::notification::{
    Mail, MailError, MailKind, Mailer, NotificationService, RecordingMailer, serve_notifications,
};
pub use participants::order::{OrderPaidConsumer, serve_orders};
pub use participants::payment::{
    GatewayError, InMemoryPaymentGateway, PaymentGateway, PaymentRequest, PaymentSession,
    PaymentWebhook,
};
pub use reconciliation::{ReconcileConfig, ReconcileReport, Reconciler};
pub use runner::{Saga, SagaStep};
pub use state::{SagaLog, SagaState};
