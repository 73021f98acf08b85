//! Provisioning of the database container the application depends on.

use tracing::{info, instrument};

use super::{create_tracked, ProvisioningError};
use crate::config::DependencyConfig;
use crate::framework::{wait_until_ready, ContainerRuntime, Probe, RunContext};
use crate::lifecycle::TeardownStack;
use crate::model::{
    ContainerHandle, ContainerSpec, ContainerStatus, EnvironmentBundle, HealthCheck, HealthState, NetworkInfo,
};

/// A started, network-ready database container.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedDependency {
    pub handle: ContainerHandle,
    pub network: NetworkInfo,
}

/// Creates and starts the database, then waits until it is reachable.
pub struct DependencyProvisioner<'a, R: ContainerRuntime + ?Sized> {
    runtime: &'a R,
    config: &'a DependencyConfig,
    pull_image: bool,
}

impl<'a, R: ContainerRuntime + ?Sized> DependencyProvisioner<'a, R> {
    pub fn new(runtime: &'a R, config: &'a DependencyConfig) -> Self {
        Self {
            runtime,
            config,
            pull_image: false,
        }
    }

    pub fn with_image_pull(mut self, pull_image: bool) -> Self {
        self.pull_image = pull_image;
        self
    }

    pub fn spec(&self, name: &str) -> ContainerSpec {
        let credentials = &self.config.credentials;
        let spec = ContainerSpec::new(
            self.config.image.clone(),
            name,
            EnvironmentBundle::for_database(credentials),
        );
        if self.config.healthcheck {
            spec.with_healthcheck(HealthCheck::shell(format!(
                "pg_isready -h 127.0.0.1 -p {POSTGRES_PORT} -U {} -d {}",
                shell_quote(&credentials.user),
                shell_quote(&credentials.db)
            )))
        } else {
            spec
        }
    }

    /// Provisions the database under `name`.
    ///
    /// The name is reserved with `teardown` before the container is created,
    /// so a failed start, readiness wait or timed-out create still gets
    /// cleaned up.
    #[instrument(skip(self, ctx, teardown), fields(image = %self.config.image))]
    pub async fn provision(
        &self,
        ctx: &RunContext,
        name: &str,
        teardown: &mut TeardownStack,
    ) -> Result<ProvisionedDependency, ProvisioningError> {
        if self.pull_image {
            info!("Pulling image");
            self.runtime
                .pull_image(ctx, &self.config.image)
                .await
                .map_err(|e| {
                    ProvisioningError::from_runtime(name, e, |_, source| ProvisioningError::ImagePull {
                        image: self.config.image.clone(),
                        source,
                    })
                })?;
        }

        let spec = self.spec(name);
        let handle = create_tracked(self.runtime, ctx, &spec, teardown).await?;
        info!(container = %handle.id, "Created database container");

        self.runtime
            .start(ctx, &handle)
            .await
            .map_err(|e| ProvisioningError::from_runtime(name, e, |name, source| ProvisioningError::Start { name, source }))?;
        info!(container = %handle.id, "Started database container, waiting for readiness");

        let network = wait_until_ready(self.runtime, ctx, &handle, &self.config.readiness, database_ready)
            .await
            .map_err(|e| ProvisioningError::from_wait(name, e))?;

        info!(container = %handle.id, address = %network.ip_address(), "Database ready");
        Ok(ProvisionedDependency { handle, network })
    }
}

/// Port the server listens on inside its own container.
const POSTGRES_PORT: u16 = 5432;

/// Single-quotes `value` for `sh -c`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Ready once the container runs, has an address and its healthcheck (if
/// any) passes. An exited or unhealthy container fails immediately.
pub fn database_ready(status: &ContainerStatus) -> Probe<NetworkInfo> {
    if !status.running {
        return match status.exit_code {
            Some(code) => Probe::Failed(format!("container exited with code {code}")),
            None => Probe::Pending("container not running yet".to_string()),
        };
    }
    match (status.health, &status.network) {
        (HealthState::Unhealthy, _) => Probe::Failed("healthcheck reports unhealthy".to_string()),
        (_, None) => Probe::Pending("no network address yet".to_string()),
        (HealthState::Starting, Some(_)) => Probe::Pending("healthcheck still starting".to_string()),
        (HealthState::Healthy | HealthState::NotConfigured, Some(network)) => Probe::Ready(network.clone()),
    }
}
