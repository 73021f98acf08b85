//! Bringing the two containers up, in order.
//!
//! [`DependencyProvisioner`] starts the database and waits until it has an
//! address. [`ConsumerProvisioner`] starts the application with that address
//! in its environment. Both reserve every container name with the run's
//! [`TeardownStack`](crate::lifecycle::TeardownStack) before creating it.

pub mod consumer;
pub mod dependency;
pub mod error;

pub use consumer::*;
pub use dependency::*;
pub use error::*;

use tracing::warn;

use crate::framework::{ContainerRuntime, RunContext};
use crate::lifecycle::TeardownStack;
use crate::model::{ContainerHandle, ContainerSpec};

/// Creates `spec` with its name reserved for teardown first.
///
/// A cancelled or timed-out `create` may still complete on the daemon, so
/// the reservation is kept and teardown removes the container by name. Only
/// a definite rejection drops it.
pub(crate) async fn create_tracked<R>(
    runtime: &R,
    ctx: &RunContext,
    spec: &ContainerSpec,
    teardown: &mut TeardownStack,
) -> Result<ContainerHandle, ProvisioningError>
where
    R: ContainerRuntime + ?Sized,
{
    teardown.register_pending(&spec.name);
    match runtime.create(ctx, spec).await {
        Ok(handle) => {
            teardown.register(handle.clone());
            Ok(handle)
        }
        Err(e) => {
            if e.is_cancelled() || e.is_transient() {
                warn!(name = %spec.name, error = %e, "Create outcome unknown, keeping name for teardown");
            } else {
                teardown.discard_pending(&spec.name);
            }
            Err(ProvisioningError::from_runtime(&spec.name, e, |name, source| {
                ProvisioningError::Create { name, source }
            }))
        }
    }
}
