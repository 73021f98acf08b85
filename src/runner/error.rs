//! Error types for the test-runner handoff.

use std::time::Duration;

use thiserror::Error;

use super::CommandError;

/// Failures of the user-journey test run.
///
/// The harness only surfaces these; diagnosing them is the test suite's job.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TestExecutionError {
    /// The runner could not be started.
    #[error("test runner could not be launched: {0}")]
    Launch(String),

    /// The suite ran and reported failures.
    #[error("user-journey tests failed{}", exit_suffix(.code))]
    Failed { code: Option<i32> },

    /// The suite did not finish within its budget.
    #[error("user-journey tests did not finish within {after:?}")]
    TimedOut { after: Duration },

    #[error("test run cancelled")]
    Cancelled,
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {code})"),
        None => " (terminated by signal)".to_string(),
    }
}

impl From<CommandError> for TestExecutionError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Spawn { program, reason } => {
                TestExecutionError::Launch(format!("{program}: {reason}"))
            }
            CommandError::Exited { code, .. } => TestExecutionError::Failed { code },
            CommandError::TimedOut { after, .. } => TestExecutionError::TimedOut { after },
            CommandError::Cancelled { .. } => TestExecutionError::Cancelled,
        }
    }
}
