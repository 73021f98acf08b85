//! Error types for the provisioning steps.

use std::time::Duration;

use thiserror::Error;

use crate::framework::{RuntimeError, WaitError};
use crate::runner::CommandError;

/// A create/start/inspect sequence that did not reach the required state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProvisioningError {
    #[error("failed to pull image {image}: {source}")]
    ImagePull { image: String, source: RuntimeError },

    #[error("failed to create container {name}: {source}")]
    Create { name: String, source: RuntimeError },

    #[error("failed to start container {name}: {source}")]
    Start { name: String, source: RuntimeError },

    #[error("inspecting container {name} failed: {source}")]
    Inspect { name: String, source: RuntimeError },

    /// The readiness budget ran out.
    #[error("container {name} was not ready after {waited:?} (last observation: {last_observation})")]
    ReadinessTimeout {
        name: String,
        waited: Duration,
        last_observation: String,
    },

    /// The container reached a state it cannot recover from.
    #[error("container {name} can no longer become ready: {reason}")]
    NotReady { name: String, reason: String },

    #[error("database preparation failed: {0}")]
    Preparation(#[source] CommandError),

    #[error("provisioning of {name} was cancelled")]
    Cancelled { name: String },
}

impl ProvisioningError {
    /// Wraps a runtime failure, keeping cancellation distinguishable.
    pub(crate) fn from_runtime(
        name: &str,
        err: RuntimeError,
        wrap: impl FnOnce(String, RuntimeError) -> Self,
    ) -> Self {
        if err.is_cancelled() {
            ProvisioningError::Cancelled { name: name.to_string() }
        } else {
            wrap(name.to_string(), err)
        }
    }

    pub(crate) fn from_wait(name: &str, err: WaitError) -> Self {
        let name = name.to_string();
        match err {
            WaitError::TimedOut {
                waited,
                last_observation,
            } => ProvisioningError::ReadinessTimeout {
                name,
                waited,
                last_observation,
            },
            WaitError::Cancelled => ProvisioningError::Cancelled { name },
            WaitError::Failed(reason) => ProvisioningError::NotReady { name, reason },
            WaitError::Runtime(source) => ProvisioningError::Inspect { name, source },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProvisioningError::Cancelled { .. })
            || matches!(self, ProvisioningError::Preparation(CommandError::Cancelled { .. }))
    }
}
