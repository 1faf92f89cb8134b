// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error types.
//!
//! Every routine failure is terminal for that routine only. The scheduler
//! reports it once to the failure observer and keeps going.

use crate::routine::RoutineId;

/// Why a routine stopped before its step sequence was exhausted.
#[derive(Debug, thiserror::Error)]
pub enum RoutineError {
    /// The routine body returned `Err`.
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("malformed operation `{op}`: {reason}")]
    MalformedOperation { op: &'static str, reason: String },

    #[error("suspended without yielding an operation; only csp operations may be awaited inside a routine")]
    NoOperation,

    #[error("yielded {0} operations in one step; await operations one at a time")]
    ConcurrentOperations(usize),
}

/// A routine failure as delivered to the failure observer.
#[derive(Debug)]
pub struct RoutineFailure {
    pub id: RoutineId,
    pub name: String,
    pub error: RoutineError,
}

impl std::fmt::Display for RoutineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "routine {} `{}` {}", self.id, self.name, self.error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("scheduler is already running; run() cannot be called from inside a routine")]
    NestedRun,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_names_the_routine() {
        let failure = RoutineFailure {
            id: RoutineId(3),
            name: "worker".to_string(),
            error: RoutineError::Panicked("boom".to_string()),
        };
        assert_eq!(failure.to_string(), "routine #3 `worker` panicked: boom");
    }

    #[test]
    fn failed_shows_context_chain() {
        let err = anyhow::anyhow!("disk full").context("saving snapshot");
        let msg = RoutineError::Failed(err).to_string();
        assert_eq!(msg, "saving snapshot: disk full");
    }
}
