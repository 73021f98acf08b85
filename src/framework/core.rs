//! # Runtime Abstraction
//!
//! This module defines the seam between the harness and the container runtime.
//!
//! ## Key Types
//!
//! - [`ContainerRuntime`]: The operations the harness invokes on the runtime.
//! - [`RunContext`]: Cancellation and per-call timeout carried into every call.
//! - [`RuntimeOp`]: Names the operation that failed.
//! - [`RuntimeError`]: Transport or API failure talking to the runtime.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::{ContainerHandle, ContainerSpec, ContainerStatus};

// =============================================================================
// 1. OPERATIONS & ERRORS
// =============================================================================

/// A single call against the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Connect,
    PullImage,
    Create,
    Start,
    Inspect,
    Stop,
    Remove,
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeOp::Connect => "connect",
            RuntimeOp::PullImage => "pull_image",
            RuntimeOp::Create => "create",
            RuntimeOp::Start => "start",
            RuntimeOp::Inspect => "inspect",
            RuntimeOp::Stop => "stop",
            RuntimeOp::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Errors raised while talking to the container runtime.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RuntimeError {
    /// The daemon could not be reached at all.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime rejected or failed an individual call.
    #[error("{op} failed{}: {reason}", container_suffix(.container))]
    Api {
        op: RuntimeOp,
        container: Option<String>,
        reason: String,
        transient: bool,
    },

    /// The container no longer exists.
    #[error("{op} failed: container {container} not found")]
    NotFound { op: RuntimeOp, container: String },

    /// The caller's context was cancelled before the call completed.
    #[error("{op} cancelled{}", container_suffix(.container))]
    Cancelled { op: RuntimeOp, container: Option<String> },
}

fn container_suffix(container: &Option<String>) -> String {
    container
        .as_deref()
        .map(|id| format!(" for container {id}"))
        .unwrap_or_default()
}

impl RuntimeError {
    pub fn api(op: RuntimeOp, container: Option<&str>, reason: impl Into<String>) -> Self {
        RuntimeError::Api {
            op,
            container: container.map(str::to_string),
            reason: reason.into(),
            transient: false,
        }
    }

    pub fn transient(op: RuntimeOp, container: Option<&str>, reason: impl Into<String>) -> Self {
        RuntimeError::Api {
            op,
            container: container.map(str::to_string),
            reason: reason.into(),
            transient: true,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RuntimeError::Unavailable(_) => true,
            RuntimeError::Api { transient, .. } => *transient,
            RuntimeError::NotFound { .. } | RuntimeError::Cancelled { .. } => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuntimeError::Cancelled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}

// =============================================================================
// 2. THE CALL CONTEXT
// =============================================================================

/// Cancellation and timeout carried into every runtime call.
///
/// Cloning shares the same cancellation token.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    call_timeout: Duration,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, call_timeout: Duration) -> Self {
        Self { cancel, call_timeout }
    }

    /// A context nothing can cancel. Used for teardown, which must run even
    /// after the run itself was aborted.
    pub fn detached(call_timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), call_timeout)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Sleeps for `duration` unless the context is cancelled first.
    /// Returns `false` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Runs one runtime call bounded by cancellation and the per-call timeout.
    pub async fn call<T, F>(&self, op: RuntimeOp, container: Option<&str>, fut: F) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        self.call_within(self.call_timeout, op, container, fut).await
    }

    /// Like [`RunContext::call`] with an explicit bound, used when a caller's
    /// remaining budget is shorter than the per-call timeout.
    pub async fn call_within<T, F>(
        &self,
        limit: Duration,
        op: RuntimeOp,
        container: Option<&str>,
        fut: F,
    ) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        let cancelled = || RuntimeError::Cancelled {
            op,
            container: container.map(str::to_string),
        };
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled()),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(RuntimeError::transient(
                    op,
                    container,
                    format!("timed out after {limit:?}"),
                )),
            },
        }
    }
}

// =============================================================================
// 3. THE RUNTIME CONTRACT
// =============================================================================

/// Control-plane operations the harness needs from a container runtime.
///
/// # Architecture Note
/// Provisioners and the orchestrator only ever see this trait, so the real
/// Docker client and the in-memory [`MockRuntime`](crate::framework::mock::MockRuntime)
/// are interchangeable. Implementations are expected to run each call through
/// [`RunContext::call`] so that cancellation reaches every request.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Makes sure `image` is present locally.
    async fn pull_image(&self, ctx: &RunContext, image: &str) -> Result<(), RuntimeError>;

    async fn create(&self, ctx: &RunContext, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn start(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn inspect(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<ContainerStatus, RuntimeError>;

    /// Stops a container. Stopping an already stopped container succeeds.
    async fn stop(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Force-removes a container and its anonymous volumes.
    async fn remove(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn api_error_mentions_container() {
        let err = RuntimeError::api(RuntimeOp::Start, Some("abc123"), "port already allocated");
        assert_eq!(err.to_string(), "start failed for container abc123: port already allocated");

        let err = RuntimeError::api(RuntimeOp::PullImage, None, "denied");
        assert_eq!(err.to_string(), "pull_image failed: denied");
    }

    #[test]
    fn transient_classification() {
        assert!(RuntimeError::Unavailable("refused".into()).is_transient());
        assert!(RuntimeError::transient(RuntimeOp::Inspect, None, "502").is_transient());
        assert!(!RuntimeError::api(RuntimeOp::Create, None, "conflict").is_transient());
        assert!(!RuntimeError::Cancelled { op: RuntimeOp::Inspect, container: None }.is_transient());
    }

    #[tokio::test]
    async fn call_times_out() {
        let ctx = RunContext::detached(Duration::from_millis(20));
        let result: Result<(), _> = ctx
            .call(RuntimeOp::Inspect, Some("c1"), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn call_observes_cancellation() {
        let cancel = CancellationToken::new();
        let ctx = RunContext::new(cancel.clone(), Duration::from_secs(30));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<(), _> = ctx
            .call(RuntimeOp::Start, Some("c1"), async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Cancelled {
                op: RuntimeOp::Start,
                container: Some("c1".to_string())
            }
        );
        assert_eq!(err.to_string(), "start cancelled for container c1");
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
