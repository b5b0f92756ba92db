//! Backoff policy for operations that must eventually be acknowledged.
//!
//! Compensating actions such as releasing reserved stock cannot be dropped
//! on the first failure. They are retried with exponential backoff, either
//! a bounded number of times or until they succeed.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Exponential backoff configuration.
///
/// Defaults: unlimited attempts, 100 ms initial delay, 30 s cap, doubling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt; `None` retries
    /// until the operation succeeds or fails permanently.
    pub max_retries: Option<usize>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that runs the operation once.
    pub fn no_retry() -> Self {
        Self {
            max_retries: Some(0),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    fn exhausted(&self, retries: usize) -> bool {
        self.max_retries.is_some_and(|max| retries >= max)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = Some(max_retries);
        self
    }

    pub fn until_acknowledged(mut self) -> Self {
        self.policy.max_retries = None;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Runs `operation` until it succeeds, the policy is exhausted, or
/// `is_transient` rejects the error.
///
/// Returns the last error on failure.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut retries = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(retries, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !is_transient(&error) || policy.exhausted(retries) {
                    tracing::warn!(retries, %error, "Giving up on operation");
                    return Err(error);
                }
                let delay = policy.delay_for_attempt(retries);
                tracing::debug!(retries, ?delay, %error, "Retrying operation");
                sleep(delay).await;
                retries += 1;
            }
        }
    }
}
