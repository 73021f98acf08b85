//! Provisioning of the application container wired to the database.

use tracing::{info, instrument};

use super::{create_tracked, ProvisioningError};
use crate::config::ConsumerConfig;
use crate::framework::{wait_until_ready, ContainerRuntime, Probe, RunContext};
use crate::lifecycle::TeardownStack;
use crate::model::{
    ContainerHandle, ContainerSpec, ContainerStatus, DatabaseCredentials, EnvironmentBundle, NetworkInfo, PortMapping,
};
use crate::runner::ServiceEndpoint;

/// Creates and starts the application container.
///
/// Application-level readiness (e.g. an HTTP health check) is left to the
/// test runner.
pub struct ConsumerProvisioner<'a, R: ContainerRuntime + ?Sized> {
    runtime: &'a R,
    config: &'a ConsumerConfig,
    credentials: &'a DatabaseCredentials,
    pull_image: bool,
}

impl<'a, R: ContainerRuntime + ?Sized> ConsumerProvisioner<'a, R> {
    /// `credentials` must be the same value the database was created with.
    pub fn new(runtime: &'a R, config: &'a ConsumerConfig, credentials: &'a DatabaseCredentials) -> Self {
        Self {
            runtime,
            config,
            credentials,
            pull_image: false,
        }
    }

    pub fn with_image_pull(mut self, pull_image: bool) -> Self {
        self.pull_image = pull_image;
        self
    }

    pub fn spec(&self, name: &str, dependency: &NetworkInfo) -> ContainerSpec {
        let env = EnvironmentBundle::for_consumer(self.credentials, dependency, &self.config.tuning)
            .with_extra(&self.config.extra_env);

        let spec = ContainerSpec::new(self.config.image.clone(), name, env);
        match self.config.publish_port {
            Some(host_port) => spec.with_port(PortMapping {
                container_port: self.config.port,
                host_port,
            }),
            None => spec,
        }
    }

    /// Provisions the application under `name`, pointed at `dependency`.
    #[instrument(skip(self, ctx, dependency, teardown), fields(image = %self.config.image, db = %dependency.ip_address()))]
    pub async fn provision(
        &self,
        ctx: &RunContext,
        name: &str,
        dependency: &NetworkInfo,
        teardown: &mut TeardownStack,
    ) -> Result<ContainerHandle, ProvisioningError> {
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

        let spec = self.spec(name, dependency);
        let handle = create_tracked(self.runtime, ctx, &spec, teardown).await?;
        info!(container = %handle.id, "Created application container");

        self.runtime
            .start(ctx, &handle)
            .await
            .map_err(|e| ProvisioningError::from_runtime(name, e, |name, source| ProvisioningError::Start { name, source }))?;
        info!(container = %handle.id, "Started application container");

        Ok(handle)
    }

    /// Where the test suite should reach the application.
    ///
    /// With a published port this is the host loopback; otherwise it waits
    /// for the container to obtain an address.
    pub async fn resolve_endpoint(
        &self,
        ctx: &RunContext,
        handle: &ContainerHandle,
    ) -> Result<ServiceEndpoint, ProvisioningError> {
        if let Some(host_port) = self.config.publish_port {
            return Ok(ServiceEndpoint::new("127.0.0.1", host_port));
        }
        let network = wait_until_ready(self.runtime, ctx, handle, &self.config.address_wait, address_assigned)
            .await
            .map_err(|e| ProvisioningError::from_wait(&handle.name, e))?;
        Ok(ServiceEndpoint::new(network.ip_address(), self.config.port))
    }
}

/// Ready as soon as a running container has an address.
pub fn address_assigned(status: &ContainerStatus) -> Probe<NetworkInfo> {
    match (&status.network, status.running, status.exit_code) {
        (Some(network), true, _) => Probe::Ready(network.clone()),
        (_, false, Some(code)) => Probe::Failed(format!("container exited with code {code}")),
        _ => Probe::Pending(status.summary()),
    }
}
