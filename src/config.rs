//! Harness configuration.
//!
//! Every field has a default matching the accounting-system stack, so an
//! empty JSON object (or no file at all) is a valid configuration. The binary
//! layers command-line flags on top of whatever [`HarnessConfig::load`] returns.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::framework::PollPolicy;
use crate::model::{ConnectionTuning, DatabaseCredentials};
use crate::runner::CommandStep;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Test suite budgets the user-journey suite is tuned for.
pub const RECOMMENDED_TEST_TIMEOUT_SECS: RangeInclusive<u64> = 10..=30;

/// How container names are derived from their base names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Use the base name verbatim. Requires that earlier runs cleaned up.
    Fixed,
    /// Append a short random suffix so repeated runs never collide.
    #[default]
    UniquePerRun,
}

/// The database container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub image: String,
    pub name: String,
    pub credentials: DatabaseCredentials,
    pub readiness: PollPolicy,
    /// Attach a `pg_isready` healthcheck and require it to pass.
    pub healthcheck: bool,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            image: "postgres:16.0-alpine3.18".to_string(),
            name: "my-postgres-test".to_string(),
            credentials: DatabaseCredentials::default(),
            readiness: PollPolicy::default(),
            healthcheck: true,
        }
    }
}

/// The application container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub image: String,
    pub name: String,
    /// Port the application listens on inside the container.
    pub port: u16,
    /// Publish `port` on this host port and hand off `127.0.0.1` instead of
    /// the container address.
    pub publish_port: Option<u16>,
    pub tuning: ConnectionTuning,
    /// Extra variables; reserved `POSTGRES_*` names are ignored.
    pub extra_env: BTreeMap<String, String>,
    /// Budget for the consumer to obtain a network address.
    pub address_wait: PollPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            image: "accounting-system-now:latest".to_string(),
            name: "accounting_system".to_string(),
            port: 8090,
            publish_port: None,
            tuning: ConnectionTuning::default(),
            extra_env: BTreeMap::new(),
            address_wait: PollPolicy::default().with_timeout(Duration::from_secs(15)),
        }
    }
}

/// An external program with a time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: vec!["run".to_string(), "-p".to_string(), "user_journey_testing".to_string()],
            timeout_secs: 30,
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn to_step(&self) -> CommandStep {
        CommandStep::new(self.program.clone(), self.args.clone(), self.timeout())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub dependency: DependencyConfig,
    pub consumer: ConsumerConfig,
    /// The user-journey test suite.
    pub tests: CommandConfig,
    /// Optional database preparation run before the consumer starts.
    pub prepare: Option<CommandConfig>,
    pub naming: NamingStrategy,
    pub pull_images: bool,
    /// Upper bound for any single runtime call.
    pub call_timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            dependency: DependencyConfig::default(),
            consumer: ConsumerConfig::default(),
            tests: CommandConfig::default(),
            prepare: None,
            naming: NamingStrategy::default(),
            pull_images: false,
            call_timeout_secs: 30,
        }
    }
}

impl HarnessConfig {
    /// Loads a JSON config file, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: display, source })
    }

    /// Rejects settings that would make every run fail, and warns about a
    /// test budget outside [`RECOMMENDED_TEST_TIMEOUT_SECS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tests.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "tests.timeout_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "call_timeout_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if !RECOMMENDED_TEST_TIMEOUT_SECS.contains(&self.tests.timeout_secs) {
            warn!(
                timeout_secs = self.tests.timeout_secs,
                recommended = ?RECOMMENDED_TEST_TIMEOUT_SECS,
                "Test timeout outside the recommended range"
            );
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Container names for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNames {
    pub dependency: String,
    pub consumer: String,
}

impl RunNames {
    pub fn resolve(config: &HarnessConfig) -> Self {
        match config.naming {
            NamingStrategy::Fixed => Self {
                dependency: config.dependency.name.clone(),
                consumer: config.consumer.name.clone(),
            },
            NamingStrategy::UniquePerRun => {
                let run_id = uuid::Uuid::new_v4().simple().to_string();
                let suffix = &run_id[..8];
                Self {
                    dependency: format!("{}-{}", config.dependency.name, suffix),
                    consumer: format!("{}-{}", config.consumer.name, suffix),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_accounting_stack() {
        let config = HarnessConfig::default();
        assert_eq!(config.dependency.image, "postgres:16.0-alpine3.18");
        assert_eq!(config.consumer.image, "accounting-system-now:latest");
        assert_eq!(config.consumer.port, 8090);
        assert_eq!(config.tests.timeout(), Duration::from_secs(30));
        assert_eq!(config.naming, NamingStrategy::UniquePerRun);
    }

    #[test]
    fn missing_path_yields_defaults() {
        assert_eq!(HarnessConfig::load(None).unwrap(), HarnessConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "naming": "fixed",
                "dependency": {{ "readiness": {{ "timeout": 5000 }} }},
                "tests": {{ "program": "./journeys.sh", "args": [], "timeout_secs": 12 }}
            }}"#
        )
        .unwrap();

        let config = HarnessConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.naming, NamingStrategy::Fixed);
        assert_eq!(config.dependency.readiness.timeout, Duration::from_secs(5));
        assert_eq!(config.dependency.readiness.initial_interval, Duration::from_millis(100));
        assert_eq!(config.dependency.image, "postgres:16.0-alpine3.18");
        assert_eq!(config.tests.program, "./journeys.sh");
        assert_eq!(config.tests.timeout(), Duration::from_secs(12));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = HarnessConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_test_timeout_is_rejected() {
        let mut config = HarnessConfig::default();
        config.tests.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "tests.timeout_secs", .. }), "{err}");

        let mut config = HarnessConfig::default();
        config.call_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unusual_test_timeouts_are_accepted() {
        assert!(HarnessConfig::default().validate().is_ok());
        for secs in [1, 9, 31, 3600] {
            let mut config = HarnessConfig::default();
            config.tests.timeout_secs = secs;
            assert!(config.validate().is_ok(), "{secs}");
        }
    }

    #[test]
    fn unique_names_differ_between_runs() {
        let config = HarnessConfig::default();
        let first = RunNames::resolve(&config);
        let second = RunNames::resolve(&config);
        assert!(first.dependency.starts_with("my-postgres-test-"));
        assert!(first.consumer.starts_with("accounting_system-"));
        assert_ne!(first.dependency, second.dependency);
    }

    #[test]
    fn fixed_names_are_verbatim() {
        let config = HarnessConfig {
            naming: NamingStrategy::Fixed,
            ..Default::default()
        };
        let names = RunNames::resolve(&config);
        assert_eq!(names.dependency, "my-postgres-test");
        assert_eq!(names.consumer, "accounting_system");
    }
}
