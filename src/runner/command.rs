//! External commands run by the harness: the database preparation hook and
//! the user-journey test suite.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{Handoff, TestExecutionError, TestReport, TestRunner};
use crate::framework::RunContext;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with {}", describe_code(.code))]
    Exited { program: String, code: Option<i32> },

    #[error("{program} did not finish within {after:?}")]
    TimedOut { program: String, after: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

/// A program with arguments and a hard time limit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStep {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

enum Finished {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl CommandStep {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Runs the command with `env` added to the inherited environment.
    ///
    /// The child is killed if it outlives the timeout or the context is
    /// cancelled. Returns the wall-clock duration on a zero exit status.
    #[instrument(skip(self, ctx, env), fields(program = %self.program))]
    pub async fn execute(&self, ctx: &RunContext, env: &[(String, String)]) -> Result<Duration, CommandError> {
        debug!(args = ?self.args, "Spawning");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let started = Instant::now();
        let finished = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => Finished::Cancelled,
            waited = tokio::time::timeout(self.timeout, child.wait()) => match waited {
                Ok(status) => Finished::Exited(status),
                Err(_) => Finished::TimedOut,
            },
        };

        match finished {
            Finished::Exited(Ok(status)) if status.success() => {
                info!(elapsed = ?started.elapsed(), "Command finished");
                Ok(started.elapsed())
            }
            Finished::Exited(Ok(status)) => Err(CommandError::Exited {
                program: self.program.clone(),
                code: status.code(),
            }),
            Finished::Exited(Err(e)) => Err(CommandError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            }),
            Finished::TimedOut => {
                warn!(timeout = ?self.timeout, "Command timed out, killing it");
                let _ = child.kill().await;
                Err(CommandError::TimedOut {
                    program: self.program.clone(),
                    after: self.timeout,
                })
            }
            Finished::Cancelled => {
                warn!("Command cancelled, killing it");
                let _ = child.kill().await;
                Err(CommandError::Cancelled {
                    program: self.program.clone(),
                })
            }
        }
    }
}

/// Runs the user-journey suite as an external program.
///
/// The consumer endpoint and both container identities are exported as
/// `APP_BASE_URL`, `APP_HOST`, `APP_PORT`, `HARNESS_CONSUMER_ID`,
/// `HARNESS_DEPENDENCY_ID` and, as one JSON document, `HARNESS_HANDOFF`.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    step: CommandStep,
}

impl CommandTestRunner {
    pub fn new(step: CommandStep) -> Self {
        Self { step }
    }

    fn handoff_env(handoff: &Handoff) -> Vec<(String, String)> {
        let mut env = vec![
            ("APP_BASE_URL".to_string(), handoff.endpoint.base_url()),
            ("APP_HOST".to_string(), handoff.endpoint.host.clone()),
            ("APP_PORT".to_string(), handoff.endpoint.port.to_string()),
            ("HARNESS_CONSUMER_ID".to_string(), handoff.consumer.id.clone()),
            ("HARNESS_DEPENDENCY_ID".to_string(), handoff.dependency.id.clone()),
        ];
        match serde_json::to_string(handoff) {
            Ok(json) => env.push(("HARNESS_HANDOFF".to_string(), json)),
            Err(e) => warn!(error = %e, "Could not serialise handoff"),
        }
        env
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, ctx: &RunContext, handoff: &Handoff) -> Result<TestReport, TestExecutionError> {
        info!(endpoint = %handoff.endpoint.base_url(), "Handing off to user-journey tests");
        let env = Self::handoff_env(handoff);
        let duration = self.step.execute(ctx, &env).await?;
        Ok(TestReport { duration })
    }
}
