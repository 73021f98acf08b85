//! Environment variables injected into the two containers.
//!
//! The consumer reads its database settings from ten `POSTGRES_*` variables whose
//! names and casing are a fixed contract. [`EnvKey`] enumerates them, and
//! [`EnvironmentBundle::for_consumer`] is the only place that fills them in.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::NetworkInfo;

/// Recognised `POSTGRES_*` variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvKey {
    Port,
    User,
    Db,
    MaxConnections,
    Host,
    ConnectTimeoutSeconds,
    Password,
    WaitTimeoutSeconds,
    PoolRecyclingMethod,
    ApplicationName,
}

impl EnvKey {
    pub const ALL: [EnvKey; 10] = [
        EnvKey::Port,
        EnvKey::User,
        EnvKey::Db,
        EnvKey::MaxConnections,
        EnvKey::Host,
        EnvKey::ConnectTimeoutSeconds,
        EnvKey::Password,
        EnvKey::WaitTimeoutSeconds,
        EnvKey::PoolRecyclingMethod,
        EnvKey::ApplicationName,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EnvKey::Port => "POSTGRES_PORT",
            EnvKey::User => "POSTGRES_USER",
            EnvKey::Db => "POSTGRES_DB",
            EnvKey::MaxConnections => "POSTGRES_MAX_CONNECTIONS",
            EnvKey::Host => "POSTGRES_HOST",
            // Lower-case suffix is what the consumer expects.
            EnvKey::ConnectTimeoutSeconds => "POSTGRES_connect_timeout_seconds",
            EnvKey::Password => "POSTGRES_PASSWORD",
            EnvKey::WaitTimeoutSeconds => "POSTGRES_WAIT_TIMEOUT_SECONDS",
            EnvKey::PoolRecyclingMethod => "POSTGRES_POOL_RECYCLING_METHOD",
            EnvKey::ApplicationName => "POSTGRES_APPLICATION_NAME",
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        Self::ALL.iter().any(|key| key.as_str() == name)
    }
}

impl fmt::Display for EnvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials shared by the database container and its consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseCredentials {
    pub user: String,
    pub password: String,
    pub db: String,
}

impl Default for DatabaseCredentials {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            db: "postgres".to_string(),
        }
    }
}

/// Connection-pool recycling policy understood by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecyclingMethod {
    Fast,
    Verified,
    #[default]
    Clean,
}

impl fmt::Display for RecyclingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecyclingMethod::Fast => "Fast",
            RecyclingMethod::Verified => "Verified",
            RecyclingMethod::Clean => "Clean",
        };
        f.write_str(name)
    }
}

/// Fixed connection parameters handed to the consumer alongside the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionTuning {
    pub port: u16,
    pub max_connections: u32,
    pub connect_timeout_seconds: u32,
    pub wait_timeout_seconds: u32,
    pub pool_recycling_method: RecyclingMethod,
    pub application_name: String,
}

impl Default for ConnectionTuning {
    fn default() -> Self {
        Self {
            port: 5432,
            max_connections: 5,
            connect_timeout_seconds: 10,
            wait_timeout_seconds: 5,
            pool_recycling_method: RecyclingMethod::Clean,
            application_name: "accounting-system".to_string(),
        }
    }
}

/// The full set of variables injected into a container at creation time.
///
/// Backed by a sorted map, so the rendered `NAME=value` list is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentBundle {
    vars: BTreeMap<String, String>,
}

impl EnvironmentBundle {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Variables the database image uses to initialise itself.
    pub fn for_database(credentials: &DatabaseCredentials) -> Self {
        Self::builder()
            .set(EnvKey::User, &credentials.user)
            .set(EnvKey::Password, &credentials.password)
            .set(EnvKey::Db, &credentials.db)
            .build()
    }

    /// Connection settings for the application container.
    ///
    /// Takes the resolved [`NetworkInfo`] of the database, so this bundle cannot
    /// exist before the dependency address is known.
    pub fn for_consumer(
        credentials: &DatabaseCredentials,
        dependency: &NetworkInfo,
        tuning: &ConnectionTuning,
    ) -> Self {
        Self::builder()
            .set(EnvKey::Port, tuning.port)
            .set(EnvKey::User, &credentials.user)
            .set(EnvKey::Db, &credentials.db)
            .set(EnvKey::MaxConnections, tuning.max_connections)
            .set(EnvKey::Host, dependency.ip_address())
            .set(EnvKey::ConnectTimeoutSeconds, tuning.connect_timeout_seconds)
            .set(EnvKey::Password, &credentials.password)
            .set(EnvKey::WaitTimeoutSeconds, tuning.wait_timeout_seconds)
            .set(EnvKey::PoolRecyclingMethod, tuning.pool_recycling_method)
            .set(EnvKey::ApplicationName, &tuning.application_name)
            .build()
    }

    /// Adds non-reserved extra variables; see [`EnvironmentBuilder::extend_extra`].
    pub fn with_extra<'a>(self, extra: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        EnvironmentBuilder { vars: self.vars }.extend_extra(extra).build()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn value(&self, key: EnvKey) -> Option<&str> {
        self.get(key.as_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Renders the `NAME=value` list container runtimes accept.
    pub fn to_env_list(&self) -> Vec<String> {
        self.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Builder for [`EnvironmentBundle`].
#[derive(Debug, Default)]
pub struct EnvironmentBuilder {
    vars: BTreeMap<String, String>,
}

impl EnvironmentBuilder {
    pub fn set(mut self, key: EnvKey, value: impl ToString) -> Self {
        self.vars.insert(key.as_str().to_string(), value.to_string());
        self
    }

    /// Adds variables outside the recognised set. Reserved `POSTGRES_*` names
    /// are skipped, so extras never override the connection contract.
    pub fn extend_extra<'a>(mut self, extra: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (name, value) in extra {
            if EnvKey::is_reserved(name) {
                tracing::warn!(name = %name, "Ignoring extra variable that shadows a reserved key");
                continue;
            }
            self.vars.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn build(self) -> EnvironmentBundle {
        EnvironmentBundle { vars: self.vars }
    }
}
