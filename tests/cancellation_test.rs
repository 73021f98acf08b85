use std::time::{Duration, Instant};

use project_runner::config::{HarnessConfig, NamingStrategy};
use project_runner::framework::mock::{MockRuntime, ScriptedTestRunner};
use project_runner::framework::{PollPolicy, RunContext, RuntimeOp};
use project_runner::lifecycle::{Orchestrator, RunState, Stage};
use project_runner::model::{ContainerHandle, ContainerStatus};
use tokio_util::sync::CancellationToken;

fn config_with_long_readiness() -> HarnessConfig {
    let mut config = HarnessConfig {
        naming: NamingStrategy::Fixed,
        ..Default::default()
    };
    config.dependency.readiness = PollPolicy {
        timeout: Duration::from_secs(60),
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(5),
    };
    config
}

/// Cancelling during the readiness poll ends the run promptly instead of
/// waiting out the 60 s budget, and the database is still removed.
#[tokio::test]
async fn test_cancel_during_readiness_poll() {
    let mock = MockRuntime::new();
    let token = CancellationToken::new();
    let ctx = RunContext::new(token.clone(), Duration::from_secs(1));
    let mut orchestrator = Orchestrator::new(mock.clone(), ScriptedTestRunner::passing(), config_with_long_readiness());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    let started = Instant::now();
    let outcome = orchestrator.run(&ctx).await;

    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    let err = outcome.result.as_ref().unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(err.stage(), Stage::DependencyProvisioning);
    assert_eq!(outcome.final_state(), Some(RunState::Failed));

    // Teardown ran on its own context
    assert_eq!(mock.calls(RuntimeOp::Stop), 1);
    assert_eq!(mock.calls(RuntimeOp::Remove), 1);
}

/// A run started with an already cancelled context creates nothing.
#[tokio::test]
async fn test_cancelled_before_start() {
    let mut mock = MockRuntime::new();
    mock.report_status_for("postgres", ContainerStatus::running_at("172.17.0.2"));
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RunContext::new(token, Duration::from_secs(1));
    let mut orchestrator = Orchestrator::new(mock.clone(), ScriptedTestRunner::passing(), config_with_long_readiness());

    let outcome = orchestrator.run(&ctx).await;

    assert!(outcome.result.unwrap_err().is_cancelled());
    assert!(mock.created_specs().is_empty());
    assert_eq!(
        outcome.teardown.released,
        vec![ContainerHandle::new("my-postgres-test", "my-postgres-test")]
    );
    assert_eq!(mock.calls_for(RuntimeOp::Start, "my-postgres-test"), 0);
}

/// Cancelling while the suite runs stops it and still releases both containers.
#[tokio::test]
async fn test_cancel_during_test_run() {
    let mut mock = MockRuntime::new();
    mock.report_status_for("postgres", ContainerStatus::running_at("172.17.0.2"));
    mock.report_status_for("accounting", ContainerStatus::running_at("172.17.0.3"));
    let token = CancellationToken::new();
    let ctx = RunContext::new(token.clone(), Duration::from_secs(1));
    let runner = ScriptedTestRunner::hanging();
    let mut orchestrator = Orchestrator::new(mock.clone(), runner.clone(), config_with_long_readiness());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let outcome = orchestrator.run(&ctx).await;

    let err = outcome.result.unwrap_err();
    assert_eq!(err.stage(), Stage::TestExecution);
    assert!(err.is_cancelled());
    assert_eq!(runner.handoffs().len(), 1);
    assert_eq!(mock.calls(RuntimeOp::Remove), 2);
}
