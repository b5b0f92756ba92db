//! Notification service: turns account and order events into mail.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bus::{HandlerError, Message, MessageBus, MessageHandler, Subscription, topics};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{OrderDelivered, UserDataOperationEvent};

pub const ACTIVATION_SUBJECT: &str = "Activate your account";
pub const RESET_PASSWORD_SUBJECT: &str = "Reset your password";
pub const ORDER_DELIVERED_SUBJECT: &str = "Your order delivered!";

const EXPIRATION_FORMAT: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailKind {
    Activation,
    PasswordReset,
    OrderDelivered,
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mail {
    pub kind: MailKind,
    /// Email address, or the user id for order mail; the mailer resolves ids.
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), MailError>;
}

/// Mailer that keeps every message in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<RwLock<Vec<Mail>>>,
    failures: Arc<RwLock<usize>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Makes the next `n` sends fail.
    pub fn fail_next(&self, n: usize) {
        if let Ok(mut failures) = self.failures.write() {
            *failures = n;
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        if let Ok(mut failures) = self.failures.write() {
            if *failures > 0 {
                *failures -= 1;
                return Err(MailError("smtp unavailable".into()));
            }
        }
        if let Ok(mut sent) = self.sent.write() {
            sent.push(mail);
        }
        Ok(())
    }
}

/// Builds mail from events and hands it to the [`Mailer`].
pub struct NotificationService<M: Mailer> {
    mailer: M,
    frontend_url: String,
}

impl<M: Mailer> NotificationService<M> {
    /// `frontend_url` prefixes activation and reset links; it should end with `/`.
    pub fn new(mailer: M, frontend_url: impl Into<String>) -> Self {
        Self {
            mailer,
            frontend_url: frontend_url.into(),
        }
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    pub fn activation_mail(&self, event: &UserDataOperationEvent) -> Mail {
        self.account_mail(MailKind::Activation, "activate", ACTIVATION_SUBJECT, event)
    }

    pub fn password_reset_mail(&self, event: &UserDataOperationEvent) -> Mail {
        self.account_mail(
            MailKind::PasswordReset,
            "reset-password",
            RESET_PASSWORD_SUBJECT,
            event,
        )
    }

    pub fn delivered_mail(&self, event: &OrderDelivered) -> Mail {
        Mail {
            kind: MailKind::OrderDelivered,
            to: event.user_id.to_string(),
            subject: ORDER_DELIVERED_SUBJECT.to_string(),
            body: format!(
                "Order {} ({}) has been delivered. Details: {}profile/orders/{}",
                event.order_id, event.total_price, self.frontend_url, event.order_id
            ),
        }
    }

    fn account_mail(
        &self,
        kind: MailKind,
        path: &str,
        subject: &str,
        event: &UserDataOperationEvent,
    ) -> Mail {
        let link = format!("{}{}/{}", self.frontend_url, path, event.activation_code);
        Mail {
            kind,
            to: event.email.clone(),
            subject: subject.to_string(),
            body: format!(
                "{link}\nThe link expires at {}.",
                event.expires_at.format(EXPIRATION_FORMAT)
            ),
        }
    }

    #[tracing::instrument(skip(self, mail), fields(kind = ?mail.kind))]
    async fn deliver(&self, mail: Mail) -> Result<(), MailError> {
        self.mailer.send(mail).await?;
        metrics::counter!("notifications_sent_total").increment(1);
        tracing::info!("Mail sent");
        Ok(())
    }
}

/// Which event a [`NotificationHandler`] consumes.
#[derive(Debug, Clone, Copy)]
enum Feed {
    Registration,
    PasswordReset,
    Delivered,
}

/// Bus consumer for one notification topic.
///
/// A mail failure fails the delivery so the bus retries it.
struct NotificationHandler<M: Mailer> {
    service: Arc<NotificationService<M>>,
    feed: Feed,
}

#[async_trait]
impl<M: Mailer + 'static> MessageHandler for NotificationHandler<M> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let mail = match self.feed {
            Feed::Registration | Feed::PasswordReset => {
                let event: UserDataOperationEvent = match message.decode() {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(topic = %message.topic, error = %e, "Discarding malformed account event");
                        return Ok(());
                    }
                };
                tracing::info!(topic = %message.topic, email = %event.email, "Received account event");
                match self.feed {
                    Feed::Registration => self.service.activation_mail(&event),
                    _ => self.service.password_reset_mail(&event),
                }
            }
            Feed::Delivered => {
                let event: OrderDelivered = match message.decode() {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding malformed delivery event");
                        return Ok(());
                    }
                };
                self.service.delivered_mail(&event)
            }
        };
        self.service.deliver(mail).await?;
        Ok(())
    }
}

/// Subscribes the notification service to its topics.
pub async fn serve_notifications<M: Mailer + 'static>(
    bus: Arc<dyn MessageBus>,
    service: Arc<NotificationService<M>>,
) -> bus::Result<Vec<Subscription>> {
    let feeds = [
        (topics::USER_REGISTRATION_EVENTS, Feed::Registration),
        (topics::USER_PASSWORD_RESET_EVENTS, Feed::PasswordReset),
        (topics::ORDER_DELIVERED, Feed::Delivered),
    ];
    let mut subscriptions = Vec::with_capacity(feeds.len());
    for (topic, feed) in feeds {
        let handler = Arc::new(NotificationHandler {
            service: service.clone(),
            feed,
        });
        subscriptions.push(bus.subscribe(topic, handler).await?);
    }
    Ok(subscriptions)
}
