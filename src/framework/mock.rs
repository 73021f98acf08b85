//! # Mock Runtime
//!
//! In-memory fakes for testing provisioning and orchestration without a
//! container daemon.
//!
//! [`MockRuntime`] implements [`ContainerRuntime`]. Queue per-operation
//! responses with the fluent `expect_*` builders; when a queue is empty the
//! mock falls back to a permissive default (create/start/stop/remove succeed,
//! inspect reports a running container without an address). Every call is
//! recorded so tests can count stop/remove calls per container.
//!
//! ```ignore
//! let mut mock = MockRuntime::new();
//! mock.expect_create().return_err(RuntimeError::api(RuntimeOp::Create, None, "conflict"));
//! mock.report_status_for("postgres", ContainerStatus::running_at("172.17.0.2"));
//!
//! // ... run code against `mock.clone()` ...
//! assert_eq!(mock.calls(RuntimeOp::Remove), 1);
//! mock.verify(); // Ensures all queued responses were consumed
//! ```
//!
//! [`ScriptedTestRunner`] does the same for the test-runner handoff.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::framework::{ContainerRuntime, RunContext, RuntimeError, RuntimeOp};
use crate::model::{ContainerHandle, ContainerSpec, ContainerStatus};
use crate::runner::{Handoff, TestExecutionError, TestReport, TestRunner};

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

/// A queued response for one runtime call.
enum Expectation {
    Unit(Result<(), RuntimeError>),
    Created(Result<String, RuntimeError>),
    Status(Result<ContainerStatus, RuntimeError>),
}

/// One call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub op: RuntimeOp,
    /// Image for pulls, container name for creates, container id otherwise.
    pub target: String,
}

#[derive(Default)]
struct MockState {
    expectations: HashMap<RuntimeOp, VecDeque<Expectation>>,
    status_rules: Vec<(String, ContainerStatus)>,
    names: HashMap<String, String>,
    calls: Vec<RecordedCall>,
    created: Vec<ContainerSpec>,
    next_id: u64,
}

/// A fake container runtime with expectation tracking.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and keep another for assertions.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn push(&self, op: RuntimeOp, expectation: Expectation) {
        self.lock()
            .expectations
            .entry(op)
            .or_default()
            .push_back(expectation);
    }

    fn pop(&self, op: RuntimeOp, target: String) -> Option<Expectation> {
        let mut state = self.lock();
        state.calls.push(RecordedCall { op, target });
        state.expectations.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Expects a `pull_image` call.
    pub fn expect_pull(&mut self) -> UnitExpectationBuilder {
        UnitExpectationBuilder { mock: self.clone(), op: RuntimeOp::PullImage }
    }

    /// Expects a `create` call.
    pub fn expect_create(&mut self) -> CreateExpectationBuilder {
        CreateExpectationBuilder { mock: self.clone() }
    }

    /// Expects a `start` call.
    pub fn expect_start(&mut self) -> UnitExpectationBuilder {
        UnitExpectationBuilder { mock: self.clone(), op: RuntimeOp::Start }
    }

    /// Expects an `inspect` call.
    pub fn expect_inspect(&mut self) -> InspectExpectationBuilder {
        InspectExpectationBuilder { mock: self.clone() }
    }

    /// Expects a `stop` call.
    pub fn expect_stop(&mut self) -> UnitExpectationBuilder {
        UnitExpectationBuilder { mock: self.clone(), op: RuntimeOp::Stop }
    }

    /// Expects a `remove` call.
    pub fn expect_remove(&mut self) -> UnitExpectationBuilder {
        UnitExpectationBuilder { mock: self.clone(), op: RuntimeOp::Remove }
    }

    /// Reports `status` for inspects of any container whose name contains
    /// `name_fragment`, whenever no inspect response is queued.
    pub fn report_status_for(&mut self, name_fragment: &str, status: ContainerStatus) {
        self.lock()
            .status_rules
            .push((name_fragment.to_string(), status));
    }

    /// Number of calls made for `op`.
    pub fn calls(&self, op: RuntimeOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of calls made for `op` against one container id.
    pub fn calls_for(&self, op: RuntimeOp, target: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op && c.target == target)
            .count()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Specs submitted to `create`, in call order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.lock().created.clone()
    }

    /// Verifies that every queued response was consumed.
    pub fn verify(&self) {
        let state = self.lock();
        let remaining: usize = state.expectations.values().map(VecDeque::len).sum();
        if remaining > 0 {
            panic!("Not all expectations were met. {} remaining", remaining);
        }
    }

    fn default_status(&self, id: &str) -> ContainerStatus {
        let state = self.lock();
        let name = state.names.get(id).map(String::as_str).unwrap_or(id);
        state
            .status_rules
            .iter()
            .find(|(fragment, _)| name.contains(fragment.as_str()))
            .map(|(_, status)| status.clone())
            .unwrap_or_else(|| ContainerStatus {
                running: true,
                ..Default::default()
            })
    }

    fn unit_response(&self, op: RuntimeOp, target: String) -> Result<(), RuntimeError> {
        match self.pop(op, target) {
            None => Ok(()),
            Some(Expectation::Unit(response)) => response,
            Some(_) => panic!("Unexpected request or expectation mismatch for {op}"),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(&self, ctx: &RunContext, image: &str) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::PullImage, None, async {
            self.unit_response(RuntimeOp::PullImage, image.to_string())
        })
        .await
    }

    async fn create(&self, ctx: &RunContext, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        ctx.call(RuntimeOp::Create, None, async {
            let response = match self.pop(RuntimeOp::Create, spec.name.clone()) {
                None => {
                    let mut state = self.lock();
                    state.next_id += 1;
                    Ok(format!("mock-{}", state.next_id))
                }
                Some(Expectation::Created(response)) => response,
                Some(_) => panic!("Unexpected request or expectation mismatch for create"),
            };
            let id = response?;
            let mut state = self.lock();
            state.created.push(spec.clone());
            state.names.insert(id.clone(), spec.name.clone());
            Ok(ContainerHandle::new(id, spec.name.clone()))
        })
        .await
    }

    async fn start(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Start, Some(&handle.id), async {
            self.unit_response(RuntimeOp::Start, handle.id.clone())
        })
        .await
    }

    async fn inspect(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<ContainerStatus, RuntimeError> {
        ctx.call(RuntimeOp::Inspect, Some(&handle.id), async {
            match self.pop(RuntimeOp::Inspect, handle.id.clone()) {
                None => Ok(self.default_status(&handle.id)),
                Some(Expectation::Status(response)) => response,
                Some(_) => panic!("Unexpected request or expectation mismatch for inspect"),
            }
        })
        .await
    }

    async fn stop(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Stop, Some(&handle.id), async {
            self.unit_response(RuntimeOp::Stop, handle.id.clone())
        })
        .await
    }

    async fn remove(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Remove, Some(&handle.id), async {
            self.unit_response(RuntimeOp::Remove, handle.id.clone())
        })
        .await
    }
}

/// Builder for pull/start/stop/remove expectations.
pub struct UnitExpectationBuilder {
    mock: MockRuntime,
    op: RuntimeOp,
}

impl UnitExpectationBuilder {
    pub fn return_ok(self) {
        self.mock.push(self.op, Expectation::Unit(Ok(())));
    }

    pub fn return_err(self, error: RuntimeError) {
        self.mock.push(self.op, Expectation::Unit(Err(error)));
    }
}

/// Builder for `create` expectations.
pub struct CreateExpectationBuilder {
    mock: MockRuntime,
}

impl CreateExpectationBuilder {
    /// Sets the container id the runtime assigns.
    pub fn return_ok(self, id: impl Into<String>) {
        self.mock.push(RuntimeOp::Create, Expectation::Created(Ok(id.into())));
    }

    pub fn return_err(self, error: RuntimeError) {
        self.mock.push(RuntimeOp::Create, Expectation::Created(Err(error)));
    }
}

/// Builder for `inspect` expectations.
pub struct InspectExpectationBuilder {
    mock: MockRuntime,
}

impl InspectExpectationBuilder {
    pub fn return_ok(self, status: ContainerStatus) {
        self.mock.push(RuntimeOp::Inspect, Expectation::Status(Ok(status)));
    }

    pub fn return_err(self, error: RuntimeError) {
        self.mock.push(RuntimeOp::Inspect, Expectation::Status(Err(error)));
    }
}

// =============================================================================
// TEST RUNNER FAKE
// =============================================================================

#[derive(Clone)]
enum Script {
    Pass,
    Fail(TestExecutionError),
    /// Never finishes on its own; only cancellation or the timeout ends it.
    Hang,
}

/// A [`TestRunner`] that returns a fixed verdict and records every handoff.
#[derive(Clone)]
pub struct ScriptedTestRunner {
    script: Script,
    handoffs: Arc<Mutex<Vec<Handoff>>>,
}

impl ScriptedTestRunner {
    pub fn passing() -> Self {
        Self::with_script(Script::Pass)
    }

    pub fn failing(error: TestExecutionError) -> Self {
        Self::with_script(Script::Fail(error))
    }

    pub fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            handoffs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handoffs(&self) -> Vec<Handoff> {
        self.handoffs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run(&self, ctx: &RunContext, handoff: &Handoff) -> Result<TestReport, TestExecutionError> {
        self.handoffs.lock().unwrap().push(handoff.clone());
        match &self.script {
            Script::Pass => Ok(TestReport {
                duration: Duration::ZERO,
            }),
            Script::Fail(error) => Err(error.clone()),
            Script::Hang => {
                ctx.cancellation().cancelled().await;
                Err(TestExecutionError::Cancelled)
            }
        }
    }
}
