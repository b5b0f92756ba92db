//! Generic saga runner.
//!
//! A saga is an ordered list of steps. Each step has a forward action and a
//! compensating action. The runner executes the forward actions in order; if
//! one fails, it compensates every completed step in reverse order and
//! returns the original failure.

use async_trait::async_trait;
use rpc::{RetryPolicy, retry_with_backoff};

use crate::error::{SagaError, StepError};
use crate::state::SagaLog;

/// One step of a saga operating on the shared context `C`.
#[async_trait]
pub trait SagaStep<C: Send + Sync>: Send + Sync {
    /// Stable name used in logs, metrics and errors.
    fn name(&self) -> &'static str;

    /// Performs the step, recording its results in `ctx`.
    async fn execute(&self, ctx: &mut C) -> Result<(), StepError>;

    /// Undoes the step. Must be idempotent: it may be retried.
    async fn compensate(&self, _ctx: &C) -> Result<(), StepError> {
        Ok(())
    }

    /// Whether a failed `execute` must itself be compensated.
    ///
    /// Return true when the failure leaves the participant's state unknown,
    /// for example after a timeout on a request that changes state.
    fn compensates_own_failure(&self, _error: &StepError) -> bool {
        false
    }
}

/// An ordered list of steps with a shared compensation retry policy.
pub struct Saga<C: Send + Sync> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
    compensation_policy: RetryPolicy,
}

impl<C: Send + Sync> Saga<C> {
    /// Creates an empty saga. Compensations retry until acknowledged.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
            compensation_policy: RetryPolicy::default(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Sets how compensations are retried on transient failures.
    pub fn compensation_policy(mut self, policy: RetryPolicy) -> Self {
        self.compensation_policy = policy;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step, compensating on failure.
    ///
    /// Returns the log of a successful run, or the failed step's error after
    /// compensation. Compensation failures are logged and counted; they never
    /// replace the original error.
    #[tracing::instrument(skip_all, fields(saga = self.name))]
    pub async fn run(&self, ctx: &mut C) -> Result<SagaLog, SagaError> {
        metrics::counter!("saga_executions_total", "saga" => self.name).increment(1);
        let started = std::time::Instant::now();
        let mut log = SagaLog::default();

        for (index, step) in self.steps.iter().enumerate() {
            let name = step.name();
            tracing::debug!(step = name, "saga step started");

            match step.execute(ctx).await {
                Ok(()) => log.step_completed(name),
                Err(reason) => {
                    tracing::warn!(step = name, error = %reason, "saga step failed");
                    log.step_failed(name);

                    let undo_until = if step.compensates_own_failure(&reason) {
                        index + 1
                    } else {
                        index
                    };
                    self.compensate(undo_until, ctx, &mut log).await;
                    log.finish();

                    metrics::counter!("saga_failed_total", "saga" => self.name, "step" => name)
                        .increment(1);
                    metrics::histogram!("saga_duration_seconds", "saga" => self.name)
                        .record(started.elapsed().as_secs_f64());
                    return Err(SagaError::StepFailed { step: name, reason });
                }
            }
        }

        log.finish();
        let duration = started.elapsed().as_secs_f64();
        metrics::counter!("saga_completed_total", "saga" => self.name).increment(1);
        metrics::histogram!("saga_duration_seconds", "saga" => self.name).record(duration);
        tracing::info!(duration, "saga completed");
        Ok(log)
    }

    /// Compensates `steps[..until]`, last step first.
    async fn compensate(&self, until: usize, ctx: &C, log: &mut SagaLog) {
        for step in self.steps[..until].iter().rev() {
            let name = step.name();
            metrics::counter!("saga_compensations_total", "saga" => self.name, "step" => name)
                .increment(1);

            let outcome = retry_with_backoff(
                &self.compensation_policy,
                StepError::is_retryable,
                || step.compensate(ctx),
            )
            .await;

            match outcome {
                Ok(()) => {
                    tracing::info!(step = name, "compensation completed");
                    log.compensated(name);
                }
                Err(e) => {
                    tracing::error!(step = name, error = %e, "compensation failed");
                    metrics::counter!(
                        "saga_compensation_failures_total",
                        "saga" => self.name,
                        "step" => name
                    )
                    .increment(1);
                    log.compensation_failed(name, e.to_string());
                }
            }
        }
    }
}
