//! Account service: registrations and password resets.
//!
//! Every change that must reach the customer by mail is recorded together
//! with its outbox event in one commit; the outbox publisher later puts the
//! event on `user-registration-events` or `user-password-reset-events`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bus::topics;
use chrono::{DateTime, Utc};
use outbox::{InMemoryOutboxStore, OutboxError};
use thiserror::Error;
use uuid::Uuid;

use crate::messages::UserDataOperationEvent;

pub const USER_REGISTERED_EVENT: &str = "UserRegistered";
pub const PASSWORD_RESET_EVENT: &str = "PasswordResetRequested";

/// How long an activation or reset code stays valid.
pub const CODE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Email already exists.")]
    EmailTaken(String),

    #[error("Email not found.")]
    UnknownEmail(String),

    #[error("Activation code not found.")]
    UnknownCode,

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),
}

pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeKind {
    Registration,
    PasswordReset,
}

#[derive(Debug, Clone)]
struct Code {
    email: String,
    kind: CodeKind,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Accounts {
    // email -> enabled
    enabled: HashMap<String, bool>,
    codes: HashMap<String, Code>,
}

/// Owns accounts and their one-time codes.
#[derive(Debug)]
pub struct AccountService {
    outbox: InMemoryOutboxStore,
    accounts: Mutex<Accounts>,
}

impl AccountService {
    pub fn new(outbox: InMemoryOutboxStore) -> Self {
        Self {
            outbox,
            accounts: Mutex::new(Accounts::default()),
        }
    }

    /// Creates a disabled account and queues its activation mail.
    ///
    /// # Errors
    ///
    /// [`AccountError::EmailTaken`] if the address is registered already.
    #[tracing::instrument(skip(self))]
    pub fn register(&self, email: &str, now: DateTime<Utc>) -> Result<UserDataOperationEvent> {
        let mut accounts = self.lock();
        if accounts.enabled.contains_key(email) {
            return Err(AccountError::EmailTaken(email.to_string()));
        }

        let event = self.record(&mut accounts, email, CodeKind::Registration, now)?;
        accounts.enabled.insert(email.to_string(), false);
        tracing::info!("Account registered");
        Ok(event)
    }

    /// Queues a password reset mail for an active account.
    ///
    /// # Errors
    ///
    /// [`AccountError::UnknownEmail`] if no active account uses the address.
    #[tracing::instrument(skip(self))]
    pub fn request_password_reset(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<UserDataOperationEvent> {
        let mut accounts = self.lock();
        if accounts.enabled.get(email) != Some(&true) {
            return Err(AccountError::UnknownEmail(email.to_string()));
        }
        self.record(&mut accounts, email, CodeKind::PasswordReset, now)
    }

    /// Enables the account an unexpired registration code belongs to.
    ///
    /// Returns the account's email. The code is single use.
    pub fn activate(&self, code: &str, now: DateTime<Utc>) -> Result<String> {
        let email = self.redeem(code, CodeKind::Registration, now)?;
        self.lock().enabled.insert(email.clone(), true);
        tracing::info!(%email, "Account activated");
        Ok(email)
    }

    /// Consumes an unexpired password reset code, returning its email.
    pub fn redeem_reset_code(&self, code: &str, now: DateTime<Utc>) -> Result<String> {
        self.redeem(code, CodeKind::PasswordReset, now)
    }

    pub fn is_enabled(&self, email: &str) -> bool {
        self.lock().enabled.get(email) == Some(&true)
    }

    /// Drops expired codes and the never-activated accounts they belonged to.
    ///
    /// Returns how many codes were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut accounts = self.lock();
        let expired: Vec<(String, Code)> = accounts
            .codes
            .iter()
            .filter(|(_, c)| c.expires_at <= now)
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        for (key, code) in &expired {
            accounts.codes.remove(key);
            if code.kind == CodeKind::Registration
                && accounts.enabled.get(&code.email) == Some(&false)
            {
                accounts.enabled.remove(&code.email);
            }
        }
        expired.len()
    }

    /// Stages the event, commits it, then stores the code.
    ///
    /// Runs under the accounts lock, so the outbox row and the state change
    /// become visible together or not at all.
    fn record(
        &self,
        accounts: &mut Accounts,
        email: &str,
        kind: CodeKind,
        now: DateTime<Utc>,
    ) -> Result<UserDataOperationEvent> {
        let ttl = chrono::Duration::from_std(CODE_TTL).unwrap_or(chrono::Duration::days(1));
        let event = UserDataOperationEvent {
            email: email.to_string(),
            activation_code: Uuid::new_v4().simple().to_string(),
            expires_at: now + ttl,
            event_time: now,
        };
        let (topic, event_type) = match kind {
            CodeKind::Registration => (topics::USER_REGISTRATION_EVENTS, USER_REGISTERED_EVENT),
            CodeKind::PasswordReset => (topics::USER_PASSWORD_RESET_EVENTS, PASSWORD_RESET_EVENT),
        };

        let mut tx = self.outbox.begin();
        tx.enqueue_json(topic, event_type, &event)?;
        tx.commit()?;

        accounts.codes.insert(
            event.activation_code.clone(),
            Code {
                email: email.to_string(),
                kind,
                expires_at: event.expires_at,
            },
        );
        Ok(event)
    }

    fn redeem(&self, code: &str, kind: CodeKind, now: DateTime<Utc>) -> Result<String> {
        let mut accounts = self.lock();
        match accounts.codes.get(code) {
            Some(found) if found.kind == kind && found.expires_at > now => {}
            _ => return Err(AccountError::UnknownCode),
        }
        accounts
            .codes
            .remove(code)
            .map(|found| found.email)
            .ok_or(AccountError::UnknownCode)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Accounts> {
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Days;
    use outbox::OutboxStore;

    fn service() -> (AccountService, InMemoryOutboxStore) {
        let outbox = InMemoryOutboxStore::new();
        (AccountService::new(outbox.clone()), outbox)
    }

    #[tokio::test]
    async fn registration_is_recorded_with_its_event() {
        let (accounts, outbox) = service();
        let now = Utc::now();

        let event = accounts.register("ann@shop.test", now).unwrap();

        assert_eq!(event.expires_at, now + Days::days(1));
        assert!(!accounts.is_enabled("ann@shop.test"));
        let records = outbox.records_for(topics::USER_REGISTRATION_EVENTS);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, USER_REGISTERED_EVENT);
        let queued: UserDataOperationEvent = serde_json::from_str(&records[0].payload).unwrap();
        assert_eq!(queued, event);
        assert_eq!(outbox.unsent_count().await.unwrap(), 1);
    }

    #[test]
    fn duplicate_email_writes_nothing() {
        let (accounts, outbox) = service();
        accounts.register("ann@shop.test", Utc::now()).unwrap();

        let err = accounts.register("ann@shop.test", Utc::now()).unwrap_err();

        assert!(matches!(err, AccountError::EmailTaken(_)));
        assert_eq!(outbox.records().len(), 1);
    }

    #[test]
    fn activation_code_is_single_use_and_expires() {
        let (accounts, _) = service();
        let now = Utc::now();
        let fresh = accounts.register("ann@shop.test", now).unwrap();
        let stale = accounts.register("bob@shop.test", now).unwrap();

        assert!(matches!(
            accounts.activate(&stale.activation_code, now + Days::days(2)),
            Err(AccountError::UnknownCode)
        ));
        assert_eq!(
            accounts.activate(&fresh.activation_code, now).unwrap(),
            "ann@shop.test"
        );
        assert!(accounts.is_enabled("ann@shop.test"));
        assert!(accounts.activate(&fresh.activation_code, now).is_err());
    }

    #[test]
    fn password_reset_needs_an_active_account() {
        let (accounts, outbox) = service();
        let now = Utc::now();
        let registered = accounts.register("ann@shop.test", now).unwrap();

        assert!(matches!(
            accounts.request_password_reset("ann@shop.test", now),
            Err(AccountError::UnknownEmail(_))
        ));

        accounts.activate(&registered.activation_code, now).unwrap();
        let reset = accounts.request_password_reset("ann@shop.test", now).unwrap();

        assert_eq!(outbox.records_for(topics::USER_PASSWORD_RESET_EVENTS).len(), 1);
        assert!(matches!(
            accounts.activate(&reset.activation_code, now),
            Err(AccountError::UnknownCode)
        ));
        assert_eq!(
            accounts.redeem_reset_code(&reset.activation_code, now).unwrap(),
            "ann@shop.test"
        );
    }

    #[test]
    fn purge_drops_unactivated_accounts() {
        let (accounts, _) = service();
        let now = Utc::now();
        accounts.register("ann@shop.test", now).unwrap();

        assert_eq!(accounts.purge_expired(now), 0);
        assert_eq!(accounts.purge_expired(now + Days::days(2)), 1);
        assert!(accounts.register("ann@shop.test", now).is_ok());
    }
}
