//! [`ContainerRuntime`] backed by the local Docker daemon.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, HealthConfig, HealthStatusEnum, HostConfig, PortBinding,
};
use bollard::Docker;
use futures::TryStreamExt;
use tracing::{debug, info, instrument};

use crate::framework::{ContainerRuntime, RunContext, RuntimeError, RuntimeOp};
use crate::model::{ContainerHandle, ContainerSpec, ContainerStatus, HealthState, NetworkInfo};

/// Grace period, in seconds, before a stopped container is killed.
const STOP_GRACE_SECS: i64 = 10;

/// Client for the Docker Engine API.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects using `DOCKER_HOST` or the platform's default socket and
    /// negotiates the API version.
    pub async fn connect(ctx: &RunContext) -> Result<Self, RuntimeError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        let docker = ctx
            .call(RuntimeOp::Connect, None, async move {
                docker
                    .negotiate_version()
                    .await
                    .map_err(|e| RuntimeError::Unavailable(e.to_string()))
            })
            .await?;
        info!("Connected to container runtime");
        Ok(Self { docker })
    }
}

impl Drop for DockerClient {
    fn drop(&mut self) {
        debug!("Container runtime client closed");
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    #[instrument(skip(self, ctx))]
    async fn pull_image(&self, ctx: &RunContext, image: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        // Pulls are bounded by cancellation only; large images outlive the call timeout.
        ctx.call_within(std::time::Duration::MAX, RuntimeOp::PullImage, None, async {
            self.docker
                .create_image(Some(options), None, None)
                .map_err(|e| classify(RuntimeOp::PullImage, None, e))
                .try_for_each(|progress| {
                    if let Some(status) = progress.status {
                        debug!(%status, "Pull progress");
                    }
                    futures::future::ok(())
                })
                .await
        })
        .await
    }

    #[instrument(skip(self, ctx, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, ctx: &RunContext, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let config = container_config(spec);
        let response = ctx
            .call(RuntimeOp::Create, None, async {
                self.docker
                    .create_container(Some(options), config)
                    .await
                    .map_err(|e| classify(RuntimeOp::Create, None, e))
            })
            .await?;
        for warning in &response.warnings {
            debug!(%warning, "Runtime warning on create");
        }
        Ok(ContainerHandle::new(response.id, spec.name.clone()))
    }

    async fn start(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Start, Some(&handle.id), async {
            self.docker
                .start_container(&handle.id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| classify(RuntimeOp::Start, Some(&handle.id), e))
        })
        .await
    }

    async fn inspect(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<ContainerStatus, RuntimeError> {
        let response = ctx
            .call(RuntimeOp::Inspect, Some(&handle.id), async {
                self.docker
                    .inspect_container(&handle.id, None::<InspectContainerOptions>)
                    .await
                    .map_err(|e| classify(RuntimeOp::Inspect, Some(&handle.id), e))
            })
            .await?;
        Ok(status_from_inspect(&response))
    }

    async fn stop(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        ctx.call(RuntimeOp::Stop, Some(&handle.id), async {
            match self
                .docker
                .stop_container(&handle.id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
                .await
            {
                // 304: already stopped.
                Err(DockerError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
                other => other.map_err(|e| classify(RuntimeOp::Stop, Some(&handle.id), e)),
            }
        })
        .await
    }

    async fn remove(&self, ctx: &RunContext, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        ctx.call(RuntimeOp::Remove, Some(&handle.id), async {
            self.docker
                .remove_container(&handle.id, Some(options))
                .await
                .map_err(|e| classify(RuntimeOp::Remove, Some(&handle.id), e))
        })
        .await
    }
}

// =============================================================================
// TRANSLATION
// =============================================================================

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let healthcheck = spec.healthcheck.as_ref().map(|check| HealthConfig {
        test: Some(vec!["CMD-SHELL".to_string(), check.command.clone()]),
        interval: Some(nanos(check.interval)),
        timeout: Some(nanos(check.timeout)),
        retries: Some(i64::from(check.retries)),
        ..Default::default()
    });

    let (exposed_ports, host_config) = if spec.ports.is_empty() {
        (None, None)
    } else {
        let mut exposed = HashMap::new();
        let mut bindings = HashMap::new();
        for mapping in &spec.ports {
            let key = format!("{}/tcp", mapping.container_port);
            exposed.insert(key.clone(), HashMap::new());
            bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(mapping.host_port.to_string()),
                }]),
            );
        }
        let host = HostConfig {
            port_bindings: Some(bindings),
            ..Default::default()
        };
        (Some(exposed), Some(host))
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.to_env_list()),
        healthcheck,
        exposed_ports,
        host_config,
        ..Default::default()
    }
}

fn nanos(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

fn status_from_inspect(response: &ContainerInspectResponse) -> ContainerStatus {
    let state = response.state.as_ref();
    let running = state.and_then(|s| s.running).unwrap_or(false);
    let finished = matches!(
        state.and_then(|s| s.status),
        Some(ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD)
    );
    let exit_code = if finished { state.and_then(|s| s.exit_code) } else { None };

    let health = match state.and_then(|s| s.health.as_ref()).and_then(|h| h.status) {
        Some(HealthStatusEnum::STARTING) => HealthState::Starting,
        Some(HealthStatusEnum::HEALTHY) => HealthState::Healthy,
        Some(HealthStatusEnum::UNHEALTHY) => HealthState::Unhealthy,
        Some(HealthStatusEnum::EMPTY | HealthStatusEnum::NONE) | None => HealthState::NotConfigured,
    };

    // The top-level address is only filled on the default bridge network.
    let network = response.network_settings.as_ref().and_then(|settings| {
        settings
            .ip_address
            .as_deref()
            .and_then(NetworkInfo::from_address)
            .or_else(|| {
                settings
                    .networks
                    .as_ref()?
                    .values()
                    .find_map(|endpoint| endpoint.ip_address.as_deref().and_then(NetworkInfo::from_address))
            })
    });

    ContainerStatus {
        running,
        exit_code,
        health,
        network,
    }
}

/// Maps a daemon error onto the runtime taxonomy: 404 is [`RuntimeError::NotFound`],
/// 5xx and transport failures are transient, everything else is fatal.
fn classify(op: RuntimeOp, container: Option<&str>, err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError { status_code: 404, message } => match container {
            Some(id) => {
                debug!(%op, %message, "Container not found");
                RuntimeError::NotFound {
                    op,
                    container: id.to_string(),
                }
            }
            None => RuntimeError::api(op, None, format!("404: {message}")),
        },
        DockerError::DockerResponseServerError { status_code, message } if status_code >= 500 => {
            RuntimeError::transient(op, container, format!("{status_code}: {message}"))
        }
        DockerError::DockerResponseServerError { status_code, message } => {
            RuntimeError::api(op, container, format!("{status_code}: {message}"))
        }
        e @ (DockerError::RequestTimeoutError | DockerError::IOError { .. } | DockerError::HyperResponseError { .. }) => {
            RuntimeError::transient(op, container, e.to_string())
        }
        other => RuntimeError::api(op, container, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnvironmentBundle, HealthCheck, PortMapping};
    use bollard::models::{ContainerState, EndpointSettings, Health, NetworkSettings};
    use std::time::Duration;

    fn spec() -> ContainerSpec {
        let env = EnvironmentBundle::builder()
            .set(crate::model::EnvKey::Host, "172.17.0.2")
            .build();
        ContainerSpec::new("accounting-system-now:latest", "accounting_system", env)
    }

    #[test]
    fn config_carries_image_and_env() {
        let config = container_config(&spec());
        assert_eq!(config.image.as_deref(), Some("accounting-system-now:latest"));
        assert_eq!(config.env, Some(vec!["POSTGRES_HOST=172.17.0.2".to_string()]));
        assert!(config.healthcheck.is_none());
        assert!(config.host_config.is_none());
    }

    #[test]
    fn config_translates_healthcheck_and_ports() {
        let spec = spec()
            .with_healthcheck(HealthCheck {
                command: "pg_isready".to_string(),
                interval: Duration::from_millis(500),
                timeout: Duration::from_secs(3),
                retries: 20,
            })
            .with_port(PortMapping {
                container_port: 8090,
                host_port: 18090,
            });
        let config = container_config(&spec);

        let health = config.healthcheck.unwrap();
        assert_eq!(health.test, Some(vec!["CMD-SHELL".to_string(), "pg_isready".to_string()]));
        assert_eq!(health.interval, Some(500_000_000));
        assert_eq!(health.retries, Some(20));

        assert!(config.exposed_ports.unwrap().contains_key("8090/tcp"));
        let bindings = config.host_config.unwrap().port_bindings.unwrap();
        let binding = &bindings["8090/tcp"].as_ref().unwrap()[0];
        assert_eq!(binding.host_port.as_deref(), Some("18090"));
    }

    #[test]
    fn inspect_reads_state_health_and_address() {
        let response = ContainerInspectResponse {
            state: Some(ContainerState {
                running: Some(true),
                status: Some(ContainerStateStatusEnum::RUNNING),
                exit_code: Some(0),
                health: Some(Health {
                    status: Some(HealthStatusEnum::HEALTHY),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ip_address: Some("172.17.0.2".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let status = status_from_inspect(&response);
        assert!(status.running);
        assert_eq!(status.exit_code, None);
        assert_eq!(status.health, HealthState::Healthy);
        assert_eq!(status.network.unwrap().ip_address(), "172.17.0.2");
    }

    #[test]
    fn inspect_falls_back_to_attached_networks() {
        let mut networks = HashMap::new();
        networks.insert(
            "harness".to_string(),
            EndpointSettings {
                ip_address: Some("10.1.0.5".to_string()),
                ..Default::default()
            },
        );
        let response = ContainerInspectResponse {
            state: Some(ContainerState {
                running: Some(false),
                status: Some(ContainerStateStatusEnum::EXITED),
                exit_code: Some(1),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ip_address: Some(String::new()),
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        };

        let status = status_from_inspect(&response);
        assert!(!status.running);
        assert_eq!(status.exit_code, Some(1));
        assert_eq!(status.health, HealthState::NotConfigured);
        assert_eq!(status.network.unwrap().ip_address(), "10.1.0.5");
    }

    #[test]
    fn errors_are_classified() {
        let not_found = classify(
            RuntimeOp::Stop,
            Some("abc"),
            DockerError::DockerResponseServerError {
                status_code: 404,
                message: "No such container: abc".to_string(),
            },
        );
        assert!(not_found.is_not_found());

        let server = classify(
            RuntimeOp::Inspect,
            Some("abc"),
            DockerError::DockerResponseServerError {
                status_code: 503,
                message: "busy".to_string(),
            },
        );
        assert!(server.is_transient());

        let conflict = classify(
            RuntimeOp::Create,
            None,
            DockerError::DockerResponseServerError {
                status_code: 409,
                message: "name in use".to_string(),
            },
        );
        assert!(!conflict.is_transient());
        assert!(!conflict.is_not_found());
    }
}
