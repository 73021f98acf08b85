//! # Run Orchestration
//!
//! [`Orchestrator`] sequences one harness run:
//!
//! ```text
//! Idle -> DependencyUp -> ConsumerUp -> TestsRunning -> TornDown
//!   \__________\______________\_____________\_______-> Failed
//! ```
//!
//! Every container name is reserved with a [`TeardownStack`] before it is
//! created, and the stack is released on every exit path (success, failure
//! and cancellation) under a context that cannot itself be cancelled.

use std::fmt;
use std::process::ExitCode;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::teardown::{TeardownReport, TeardownStack};
use crate::config::{HarnessConfig, RunNames};
use crate::framework::{ContainerRuntime, RunContext};
use crate::model::{DatabaseCredentials, EnvKey, NetworkInfo};
use crate::provisioning::{ConsumerProvisioner, DependencyProvisioner, ProvisionedDependency, ProvisioningError};
use crate::runner::{Handoff, TestExecutionError, TestReport, TestRunner};

// =============================================================================
// STATES, STAGES & ERRORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    DependencyUp,
    ConsumerUp,
    TestsRunning,
    TornDown,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::TornDown | RunState::Failed)
    }
}

/// Where in the run a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DependencyProvisioning,
    DatabasePreparation,
    ConsumerProvisioning,
    TestExecution,
    Teardown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DependencyProvisioning => "dependency provisioning",
            Stage::DatabasePreparation => "database preparation",
            Stage::ConsumerProvisioning => "consumer provisioning",
            Stage::TestExecution => "test execution",
            Stage::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// The primary failure of a run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HarnessError {
    #[error("{0}")]
    Dependency(#[source] ProvisioningError),

    #[error("{0}")]
    Preparation(#[source] ProvisioningError),

    #[error("{0}")]
    Consumer(#[source] ProvisioningError),

    #[error("{0}")]
    Tests(#[source] TestExecutionError),
}

impl HarnessError {
    pub fn stage(&self) -> Stage {
        match self {
            HarnessError::Dependency(_) => Stage::DependencyProvisioning,
            HarnessError::Preparation(_) => Stage::DatabasePreparation,
            HarnessError::Consumer(_) => Stage::ConsumerProvisioning,
            HarnessError::Tests(_) => Stage::TestExecution,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            HarnessError::Dependency(e) | HarnessError::Preparation(e) | HarnessError::Consumer(e) => e.is_cancelled(),
            HarnessError::Tests(e) => matches!(e, TestExecutionError::Cancelled),
        }
    }

    /// A completed test run that reported failures, as opposed to a run
    /// that never produced a verdict.
    pub fn is_test_verdict(&self) -> bool {
        matches!(self, HarnessError::Tests(TestExecutionError::Failed { .. }))
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Everything a finished run reports.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub result: Result<TestReport, HarnessError>,
    pub teardown: TeardownReport,
    pub history: Vec<RunState>,
}

impl RunOutcome {
    /// Process exit status.
    ///
    /// Zero only when the tests passed; teardown failures do not change it.
    /// A failing suite's own non-zero exit code is passed through.
    pub fn exit_status(&self) -> u8 {
        match &self.result {
            Ok(_) => 0,
            Err(HarnessError::Tests(TestExecutionError::Failed { code: Some(code) })) => {
                u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1)
            }
            Err(_) => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    pub fn final_state(&self) -> Option<RunState> {
        self.history.last().copied()
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Drives one run against a container runtime and a test runner.
pub struct Orchestrator<R: ContainerRuntime, T: TestRunner> {
    runtime: R,
    tests: T,
    config: HarnessConfig,
    history: Vec<RunState>,
}

impl<R: ContainerRuntime, T: TestRunner> Orchestrator<R, T> {
    pub fn new(runtime: R, tests: T, config: HarnessConfig) -> Self {
        Self {
            runtime,
            tests,
            config,
            history: vec![RunState::Idle],
        }
    }

    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn transition(&mut self, next: RunState) {
        info!(from = ?self.state(), to = ?next, "State transition");
        self.history.push(next);
    }

    /// Runs provisioning, the test handoff and teardown.
    ///
    /// Teardown always runs, even if `ctx` was cancelled. Its failures are
    /// reported in [`RunOutcome::teardown`] and never replace the primary
    /// error.
    #[instrument(skip_all, fields(naming = ?self.config.naming))]
    pub async fn run(&mut self, ctx: &RunContext) -> RunOutcome {
        if self.state() != RunState::Idle {
            warn!(state = ?self.state(), "Orchestrator reused, resetting history");
            self.history = vec![RunState::Idle];
        }

        let names = RunNames::resolve(&self.config);
        info!(dependency = %names.dependency, consumer = %names.consumer, "Starting run");

        let mut teardown = TeardownStack::new();
        let result = self.drive(ctx, &names, &mut teardown).await;

        match &result {
            Ok(report) => info!(duration = ?report.duration, "User-journey tests passed"),
            Err(e) if e.is_test_verdict() => error!(stage = %e.stage(), error = %e, "User-journey tests failed"),
            Err(e) => {
                error!(stage = %e.stage(), error = %e, "Run failed");
                self.transition(RunState::Failed);
            }
        }

        let cleanup = RunContext::detached(ctx.call_timeout());
        let report = teardown.release(&self.runtime, &cleanup).await;
        for failure in &report.failures {
            warn!(
                stage = %Stage::Teardown,
                container = %failure.handle.id,
                op = %failure.op,
                error = %failure.error,
                "Container may have leaked"
            );
        }

        if !self.state().is_terminal() {
            self.transition(RunState::TornDown);
        }

        RunOutcome {
            result,
            teardown: report,
            history: self.history.clone(),
        }
    }

    async fn drive(
        &mut self,
        ctx: &RunContext,
        names: &RunNames,
        teardown: &mut TeardownStack,
    ) -> Result<TestReport, HarnessError> {
        let dependency = DependencyProvisioner::new(&self.runtime, &self.config.dependency)
            .with_image_pull(self.config.pull_images)
            .provision(ctx, &names.dependency, teardown)
            .await
            .map_err(HarnessError::Dependency)?;
        self.transition(RunState::DependencyUp);

        self.prepare_database(ctx, &dependency.network).await?;

        let handoff = self.start_consumer(ctx, names, &dependency, teardown).await?;
        self.transition(RunState::ConsumerUp);

        self.transition(RunState::TestsRunning);
        let budget = self.config.tests.timeout();
        match tokio::time::timeout(budget, self.tests.run(ctx, &handoff)).await {
            Ok(verdict) => verdict.map_err(HarnessError::Tests),
            Err(_) => Err(HarnessError::Tests(TestExecutionError::TimedOut { after: budget })),
        }
    }

    async fn prepare_database(&self, ctx: &RunContext, database: &NetworkInfo) -> Result<(), HarnessError> {
        let Some(prepare) = &self.config.prepare else {
            return Ok(());
        };
        info!(program = %prepare.program, "Preparing database");
        let env = preparation_env(
            &self.config.dependency.credentials,
            database,
            self.config.consumer.tuning.port,
        );
        prepare
            .to_step()
            .execute(ctx, &env)
            .await
            .map(|_| ())
            .map_err(|e| HarnessError::Preparation(ProvisioningError::Preparation(e)))
    }

    async fn start_consumer(
        &self,
        ctx: &RunContext,
        names: &RunNames,
        dependency: &ProvisionedDependency,
        teardown: &mut TeardownStack,
    ) -> Result<Handoff, HarnessError> {
        let provisioner =
            ConsumerProvisioner::new(&self.runtime, &self.config.consumer, &self.config.dependency.credentials)
                .with_image_pull(self.config.pull_images);

        let handle = provisioner
            .provision(ctx, &names.consumer, &dependency.network, teardown)
            .await
            .map_err(HarnessError::Consumer)?;
        let endpoint = provisioner
            .resolve_endpoint(ctx, &handle)
            .await
            .map_err(HarnessError::Consumer)?;

        Ok(Handoff {
            endpoint,
            consumer: handle,
            dependency: dependency.handle.clone(),
        })
    }
}

/// Connection variables for the preparation hook.
fn preparation_env(credentials: &DatabaseCredentials, database: &NetworkInfo, port: u16) -> Vec<(String, String)> {
    [
        (EnvKey::Host, database.ip_address().to_string()),
        (EnvKey::Port, port.to_string()),
        (EnvKey::User, credentials.user.clone()),
        (EnvKey::Password, credentials.password.clone()),
        (EnvKey::Db, credentials.db.clone()),
    ]
    .into_iter()
    .map(|(key, value)| (key.as_str().to_string(), value))
    .collect()
}
