//! Result of a best-effort step.
//!
//! Fatal failures are `Err(AgentError)`. A step that did not fully apply but
//! must not abort the surrounding pipeline reports `Degraded` instead, and the
//! caller decides whether to log it, collect it, or both.

use std::fmt;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    Degraded(String),
}

impl StepOutcome {
    pub fn degraded(msg: impl Into<String>) -> Self {
        StepOutcome::Degraded(msg.into())
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StepOutcome::Applied)
    }

    /// Fold a `Result` into an outcome, describing the failed step with `step`.
    pub fn from_result<T, E: fmt::Display>(step: &str, result: Result<T, E>) -> Self {
        match result {
            Ok(_) => StepOutcome::Applied,
            Err(e) => StepOutcome::Degraded(format!("{}: {}", step, e)),
        }
    }

    /// Log a degraded outcome and push its message into `warnings`.
    pub fn record(self, warnings: &mut Vec<String>) {
        if let StepOutcome::Degraded(msg) = self {
            warn!("{}", msg);
            warnings.push(msg);
        }
    }

    /// Log a degraded outcome.
    pub fn log(self) {
        if let StepOutcome::Degraded(msg) = self {
            warn!("{}", msg);
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied => write!(f, "applied"),
            StepOutcome::Degraded(msg) => write!(f, "degraded: {}", msg),
        }
    }
}
