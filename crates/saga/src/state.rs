//! Progress of one saga run.

use serde::{Deserialize, Serialize};

/// Lifecycle of a saga run.
///
/// ```text
/// Running ──┬──► Completed
///           └──► Compensating ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Forward steps are executing.
    #[default]
    Running,

    /// A step failed and completed steps are being undone.
    Compensating,

    /// Every forward step succeeded (terminal).
    Completed,

    /// A step failed and compensation finished (terminal).
    Compensated,
}

impl SagaState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Compensated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step bookkeeping kept by the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaLog {
    state: SagaState,
    completed: Vec<&'static str>,
    compensated: Vec<&'static str>,
    compensation_failures: Vec<(&'static str, String)>,
    failed_step: Option<&'static str>,
}

impl SagaLog {
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Forward steps that succeeded, in execution order.
    pub fn completed_steps(&self) -> &[&'static str] {
        &self.completed
    }

    /// Steps undone, in compensation order.
    pub fn compensated_steps(&self) -> &[&'static str] {
        &self.compensated
    }

    /// Compensations that gave up, with their last error.
    pub fn compensation_failures(&self) -> &[(&'static str, String)] {
        &self.compensation_failures
    }

    pub fn failed_step(&self) -> Option<&'static str> {
        self.failed_step
    }

    pub(crate) fn step_completed(&mut self, step: &'static str) {
        self.completed.push(step);
    }

    pub(crate) fn step_failed(&mut self, step: &'static str) {
        self.failed_step = Some(step);
        self.state = SagaState::Compensating;
    }

    pub(crate) fn compensated(&mut self, step: &'static str) {
        self.compensated.push(step);
    }

    pub(crate) fn compensation_failed(&mut self, step: &'static str, error: String) {
        self.compensation_failures.push((step, error));
    }

    pub(crate) fn finish(&mut self) {
        self.state = match self.state {
            SagaState::Compensating => SagaState::Compensated,
            _ => SagaState::Completed,
        };
    }
}
