//! A `create` that outlives its call timeout must not leak the container
//! the daemon went on to create.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use project_runner::config::{HarnessConfig, NamingStrategy};
use project_runner::framework::mock::ScriptedTestRunner;
use project_runner::framework::{ContainerRuntime, RunContext, RuntimeError, RuntimeOp};
use project_runner::lifecycle::{Orchestrator, RunState, Stage};
use project_runner::model::{ContainerHandle, ContainerSpec, ContainerStatus};

/// A daemon that registers every container as soon as it is asked to, then
/// answers `create` only after `reply_after`.
#[derive(Clone, Default)]
struct SlowDaemon {
    containers: Arc<Mutex<HashSet<String>>>,
    reply_after: Duration,
}

impl SlowDaemon {
    fn new(reply_after: Duration) -> Self {
        Self {
            reply_after,
            ..Default::default()
        }
    }

    fn containers(&self) -> HashSet<String> {
        self.containers.lock().unwrap().clone()
    }

    fn require(&self, op: RuntimeOp, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        if self.containers.lock().unwrap().contains(&handle.id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound {
                op,
                container: handle.id.clone(),
            })
        }
    }
}

#[async_trait]
impl ContainerRuntime for SlowDaemon {
    async fn pull_image(&self, _ctx: &RunContext, _image: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create(&self, ctx: &RunContext, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        ctx.call(RuntimeOp::Create, None, async {
            self.containers.lock().unwrap().insert(spec.name.clone());
            tokio::time::sleep(self.reply_after).await;
            Ok(ContainerHandle::new(spec.name.clone(), spec.name.clone()))
        })
        .await
    }

    async fn start(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Start, Some(&handle.id), async { self.require(RuntimeOp::Start, handle) })
            .await
    }

    async fn inspect(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<ContainerStatus, RuntimeError> {
        ctx.call(RuntimeOp::Inspect, Some(&handle.id), async {
            self.require(RuntimeOp::Inspect, handle)
                .map(|_| ContainerStatus::running_at("172.17.0.2"))
        })
        .await
    }

    async fn stop(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Stop, Some(&handle.id), async { self.require(RuntimeOp::Stop, handle) })
            .await
    }

    async fn remove(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Remove, Some(&handle.id), async {
            self.require(RuntimeOp::Remove, handle)?;
            self.containers.lock().unwrap().remove(&handle.id);
            Ok(())
        })
        .await
    }
}

fn fixed_names() -> HarnessConfig {
    HarnessConfig {
        naming: NamingStrategy::Fixed,
        ..Default::default()
    }
}

/// The database create times out on our side but completes on the daemon;
/// teardown still removes it by name.
#[tokio::test]
async fn test_timed_out_create_is_removed_by_name() {
    let daemon = SlowDaemon::new(Duration::from_millis(500));
    let runner = ScriptedTestRunner::passing();
    let mut orchestrator = Orchestrator::new(daemon.clone(), runner.clone(), fixed_names());

    let outcome = orchestrator.run(&RunContext::detached(Duration::from_millis(100))).await;

    let err = outcome.result.as_ref().unwrap_err();
    assert_eq!(err.stage(), Stage::DependencyProvisioning);
    assert!(!err.is_cancelled(), "{err}");
    assert_eq!(outcome.final_state(), Some(RunState::Failed));
    assert!(outcome.teardown.is_clean(), "{:?}", outcome.teardown.failures);
    assert_eq!(
        outcome.teardown.released,
        vec![ContainerHandle::new("my-postgres-test", "my-postgres-test")]
    );
    assert!(daemon.containers().is_empty(), "leaked: {:?}", daemon.containers());
    assert!(runner.handoffs().is_empty());
}

/// When the daemon answers in time the same runtime leaves nothing behind
/// after a full run.
#[tokio::test]
async fn test_prompt_daemon_leaves_nothing_behind() {
    let daemon = SlowDaemon::new(Duration::from_millis(5));
    let mut orchestrator = Orchestrator::new(daemon.clone(), ScriptedTestRunner::passing(), fixed_names());

    let outcome = orchestrator.run(&RunContext::detached(Duration::from_secs(1))).await;

    assert!(outcome.result.is_ok(), "{:?}", outcome.result);
    assert_eq!(outcome.teardown.released.len(), 2);
    assert!(daemon.containers().is_empty(), "leaked: {:?}", daemon.containers());
}
