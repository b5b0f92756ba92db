//! Mail transport used when no provider is configured.

use async_trait::async_trait;
use saga::{Mail, MailError, Mailer};

/// Writes every mail to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        tracing::info!(
            kind = ?mail.kind,
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "Mail sent"
        );
        Ok(())
    }
}
