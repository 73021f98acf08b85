use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::EnvironmentBundle;

/// Everything the runtime needs to create one container.
///
/// Built by a provisioner immediately before the `create` call and never
/// modified after it has been submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env: EnvironmentBundle,
    pub healthcheck: Option<HealthCheck>,
    pub ports: Vec<PortMapping>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, name: impl Into<String>, env: EnvironmentBundle) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            env,
            healthcheck: None,
            ports: Vec::new(),
        }
    }

    pub fn with_healthcheck(mut self, healthcheck: HealthCheck) -> Self {
        self.healthcheck = Some(healthcheck);
        self
    }

    pub fn with_port(mut self, mapping: PortMapping) -> Self {
        self.ports.push(mapping);
        self
    }
}

/// A healthcheck command the runtime executes inside the container.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    /// Command in the runtime's `CMD-SHELL` form.
    pub command: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
}

impl HealthCheck {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(3),
            retries: 20,
        }
    }
}

/// Publishes a container TCP port on the host loopback interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// Identity of a container the runtime has created.
///
/// The orchestrator owns every handle for the rest of the run and uses it for
/// start/inspect/stop/remove calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Internal network address of a started container.
///
/// Can only be built from a non-empty address, so holding one means the
/// container has reached a network-ready state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    ip_address: String,
}

impl NetworkInfo {
    /// Returns `None` for an empty or blank address.
    pub fn from_address(ip_address: impl Into<String>) -> Option<Self> {
        let ip_address = ip_address.into();
        let trimmed = ip_address.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self {
                ip_address: trimmed.to_string(),
            })
        }
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }
}

/// Health as reported by the runtime's healthcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthState {
    /// The container has no healthcheck configured.
    #[default]
    NotConfigured,
    Starting,
    Healthy,
    Unhealthy,
}

/// Snapshot returned by an inspect call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
    pub health: HealthState,
    pub network: Option<NetworkInfo>,
}

impl ContainerStatus {
    /// A running container with an address and no healthcheck.
    pub fn running_at(ip_address: &str) -> Self {
        Self {
            running: true,
            exit_code: None,
            health: HealthState::NotConfigured,
            network: NetworkInfo::from_address(ip_address),
        }
    }

    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = health;
        self
    }

    pub fn summary(&self) -> String {
        format!(
            "running={} health={:?} address={}",
            self.running,
            self.health,
            self.network
                .as_ref()
                .map(NetworkInfo::ip_address)
                .unwrap_or("<none>")
        )
    }
}
