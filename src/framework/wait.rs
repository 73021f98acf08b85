//! Bounded readiness polling shared by both provisioning steps.
//!
//! [`wait_until_ready`] inspects a container with exponential backoff until a
//! probe accepts the observed [`ContainerStatus`]. The total wait is capped by
//! [`PollPolicy::timeout`] and every sleep and inspect is raced against the
//! caller's cancellation token.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ContainerRuntime, RunContext, RuntimeError, RuntimeOp};
use crate::model::{ContainerHandle, ContainerStatus};

/// Backoff schedule for a readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    #[serde(with = "millis")]
    pub timeout: Duration,
    #[serde(with = "millis")]
    pub initial_interval: Duration,
    #[serde(with = "millis")]
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
        }
    }
}

impl PollPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_interval)
    }
}

/// Verdict of a probe on one inspect result.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Ready(T),
    /// Not ready yet; the string describes what is missing.
    Pending(String),
    /// Will never become ready (e.g. the container exited).
    Failed(String),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum WaitError {
    #[error("not ready after {waited:?} (last observation: {last_observation})")]
    TimedOut {
        waited: Duration,
        last_observation: String,
    },
    #[error("readiness wait cancelled")]
    Cancelled,
    #[error("container can no longer become ready: {0}")]
    Failed(String),
    #[error(transparent)]
    Runtime(RuntimeError),
}

/// Polls `handle` until `probe` reports [`Probe::Ready`].
///
/// Transient inspect failures are retried within the budget; any other runtime
/// error ends the wait immediately.
pub async fn wait_until_ready<R, T, P>(
    runtime: &R,
    ctx: &RunContext,
    handle: &ContainerHandle,
    policy: &PollPolicy,
    probe: P,
) -> Result<T, WaitError>
where
    R: ContainerRuntime + ?Sized,
    P: Fn(&ContainerStatus) -> Probe<T>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut interval = policy.initial_interval;
    let mut last_observation = String::from("no successful inspect");
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WaitError::TimedOut {
                waited: started.elapsed(),
                last_observation,
            });
        }

        let limit = remaining.min(ctx.call_timeout());
        let inspected = ctx
            .call_within(limit, RuntimeOp::Inspect, Some(&handle.id), runtime.inspect(ctx, handle))
            .await;

        match inspected {
            Ok(status) => match probe(&status) {
                Probe::Ready(value) => {
                    debug!(container = %handle.name, attempt, elapsed = ?started.elapsed(), "Ready");
                    return Ok(value);
                }
                Probe::Pending(reason) => {
                    debug!(container = %handle.name, attempt, %reason, "Not ready yet");
                    last_observation = reason;
                }
                Probe::Failed(reason) => return Err(WaitError::Failed(reason)),
            },
            Err(e) if e.is_cancelled() => return Err(WaitError::Cancelled),
            Err(e) if e.is_transient() => {
                warn!(container = %handle.name, attempt, error = %e, "Inspect failed, retrying");
                last_observation = e.to_string();
            }
            Err(e) => return Err(WaitError::Runtime(e)),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            continue;
        }
        if !ctx.sleep(interval.min(remaining)).await {
            return Err(WaitError::Cancelled);
        }
        interval = policy.next_interval(interval);
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockRuntime;
    use crate::model::NetworkInfo;
    use tokio_util::sync::CancellationToken;

    fn address_probe(status: &ContainerStatus) -> Probe<NetworkInfo> {
        match &status.network {
            Some(network) => Probe::Ready(network.clone()),
            None => Probe::Pending(status.summary()),
        }
    }

    fn fast_policy(timeout: Duration) -> PollPolicy {
        PollPolicy {
            timeout,
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn returns_once_probe_accepts() {
        let mut mock = MockRuntime::new();
        mock.expect_inspect().return_ok(ContainerStatus::default());
        mock.expect_inspect().return_ok(ContainerStatus::default());
        mock.expect_inspect().return_ok(ContainerStatus::running_at("172.17.0.9"));

        let ctx = RunContext::detached(Duration::from_secs(1));
        let handle = ContainerHandle::new("c1", "db");
        let network = wait_until_ready(&mock, &ctx, &handle, &fast_policy(Duration::from_secs(5)), address_probe)
            .await
            .unwrap();

        assert_eq!(network.ip_address(), "172.17.0.9");
        assert_eq!(mock.calls(RuntimeOp::Inspect), 3);
        mock.verify();
    }

    #[tokio::test]
    async fn gives_up_after_timeout() {
        let mock = MockRuntime::new();
        let ctx = RunContext::detached(Duration::from_secs(1));
        let handle = ContainerHandle::new("c1", "db");

        let started = Instant::now();
        let err = wait_until_ready(&mock, &ctx, &handle, &fast_policy(Duration::from_millis(150)), address_probe)
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::TimedOut { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(mock.calls(RuntimeOp::Inspect) >= 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let mock = MockRuntime::new();
        let cancel = CancellationToken::new();
        let ctx = RunContext::new(cancel.clone(), Duration::from_secs(1));
        let handle = ContainerHandle::new("c1", "db");
        let policy = PollPolicy {
            timeout: Duration::from_secs(30),
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(10),
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = wait_until_ready(&mock, &ctx, &handle, &policy, address_probe)
            .await
            .unwrap_err();

        assert_eq!(err, WaitError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mut mock = MockRuntime::new();
        mock.expect_inspect()
            .return_err(RuntimeError::transient(RuntimeOp::Inspect, Some("c1"), "daemon busy"));
        mock.expect_inspect().return_ok(ContainerStatus::running_at("10.1.0.4"));

        let ctx = RunContext::detached(Duration::from_secs(1));
        let handle = ContainerHandle::new("c1", "db");
        let network = wait_until_ready(&mock, &ctx, &handle, &fast_policy(Duration::from_secs(5)), address_probe)
            .await
            .unwrap();

        assert_eq!(network.ip_address(), "10.1.0.4");
    }

    #[tokio::test]
    async fn fatal_errors_end_the_wait() {
        let mut mock = MockRuntime::new();
        mock.expect_inspect().return_err(RuntimeError::NotFound {
            op: RuntimeOp::Inspect,
            container: "c1".into(),
        });

        let ctx = RunContext::detached(Duration::from_secs(1));
        let handle = ContainerHandle::new("c1", "db");
        let err = wait_until_ready(&mock, &ctx, &handle, &fast_policy(Duration::from_secs(5)), address_probe)
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Runtime(RuntimeError::NotFound { .. })));
        assert_eq!(mock.calls(RuntimeOp::Inspect), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = fast_policy(Duration::from_secs(1));
        assert_eq!(policy.next_interval(Duration::from_millis(5)), Duration::from_millis(10));
        assert_eq!(policy.next_interval(Duration::from_millis(15)), Duration::from_millis(20));
    }
}
