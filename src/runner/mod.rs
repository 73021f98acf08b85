//! Handoff to the external user-journey test suite.
//!
//! Once both containers are up, the orchestrator builds a [`Handoff`] and
//! gives it to a [`TestRunner`]. The runner's verdict becomes the run's
//! externally visible outcome.

pub mod command;
pub mod error;

pub use command::*;
pub use error::*;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::framework::RunContext;
use crate::model::ContainerHandle;

/// Address at which the test suite reaches the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// What the test suite receives about the provisioned stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handoff {
    pub endpoint: ServiceEndpoint,
    pub consumer: ContainerHandle,
    pub dependency: ContainerHandle,
}

/// Result of a passing test run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub duration: Duration,
}

/// Runs the user-journey suite against a provisioned stack.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Blocks until the suite reports. `Ok` means every test passed.
    async fn run(&self, ctx: &RunContext, handoff: &Handoff) -> Result<TestReport, TestExecutionError>;
}
