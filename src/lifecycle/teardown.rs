//! Guaranteed release of every container a run created.

use tracing::{error, info, instrument, warn};

use crate::framework::{ContainerRuntime, RunContext, RuntimeError, RuntimeOp};
use crate::model::ContainerHandle;

/// A stop or remove call that failed during teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct TeardownFailure {
    pub handle: ContainerHandle,
    pub op: RuntimeOp,
    pub error: RuntimeError,
}

/// What [`TeardownStack::release`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeardownReport {
    /// Handles that were processed, in release order.
    pub released: Vec<ContainerHandle>,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A container on the stack.
///
/// Until `create` returns an id, the entry is addressed by its name, which
/// the runtime accepts wherever it takes an id.
#[derive(Debug, Clone)]
struct Entry {
    handle: ContainerHandle,
    created: bool,
}

/// Containers awaiting cleanup, in creation order.
///
/// Provisioners reserve a name before asking the runtime to create it, so a
/// `create` call that times out or is cancelled while the daemon completes it
/// still leaves the container on the stack.
#[derive(Debug, Default)]
pub struct TeardownStack {
    entries: Vec<Entry>,
}

impl TeardownStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` before the container exists.
    pub fn register_pending(&mut self, name: &str) {
        if self.entries.iter().any(|e| e.handle.name == name) {
            return;
        }
        self.entries.push(Entry {
            handle: ContainerHandle::new(name, name),
            created: false,
        });
    }

    /// Records a created container, replacing its reservation if there is one.
    pub fn register(&mut self, handle: ContainerHandle) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| !e.created && e.handle.name == handle.name)
        {
            entry.handle = handle;
            entry.created = true;
            return;
        }
        if self.entries.iter().any(|e| e.handle.id == handle.id) {
            return;
        }
        self.entries.push(Entry { handle, created: true });
    }

    /// Drops the reservation for `name` once the runtime has definitely not
    /// created it. A container of that name may belong to someone else.
    pub fn discard_pending(&mut self, name: &str) {
        self.entries.retain(|e| e.created || e.handle.name != name);
    }

    pub fn pending(&self) -> Vec<ContainerHandle> {
        self.entries.iter().map(|e| e.handle.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stops and removes every registered container, newest first.
    ///
    /// Each handle is processed exactly once. A container that is already
    /// gone counts as released. Failures are collected, never raised, and a
    /// failed stop still attempts the removal. Calling this again afterwards
    /// does nothing.
    #[instrument(skip_all, fields(containers = self.entries.len()))]
    pub async fn release<R>(&mut self, runtime: &R, ctx: &RunContext) -> TeardownReport
    where
        R: ContainerRuntime + ?Sized,
    {
        let mut report = TeardownReport::default();

        while let Some(Entry { handle, created }) = self.entries.pop() {
            if created {
                info!(container = %handle.id, name = %handle.name, "Releasing container");
            } else {
                info!(name = %handle.name, "Releasing container by name, create outcome unknown");
            }

            if let Err(e) = runtime.stop(ctx, &handle).await {
                record(&mut report, &handle, RuntimeOp::Stop, e);
            }
            if let Err(e) = runtime.remove(ctx, &handle).await {
                record(&mut report, &handle, RuntimeOp::Remove, e);
            }
            report.released.push(handle);
        }

        if !report.is_clean() {
            warn!(failures = report.failures.len(), "Teardown finished with errors");
        }
        report
    }
}

fn record(report: &mut TeardownReport, handle: &ContainerHandle, op: RuntimeOp, error: RuntimeError) {
    if error.is_not_found() {
        info!(container = %handle.id, %op, "Container already gone");
        return;
    }
    error!(container = %handle.id, %op, error = %error, "Teardown step failed");
    report.failures.push(TeardownFailure {
        handle: handle.clone(),
        op,
        error,
    });
}

impl Drop for TeardownStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let ids: Vec<&str> = self.entries.iter().map(|e| e.handle.id.as_str()).collect();
            warn!(?ids, "Teardown stack dropped with containers still registered");
        }
    }
}
