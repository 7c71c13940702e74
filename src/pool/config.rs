use std::time::Duration;

use serde::Deserialize;

use super::Database;
use super::router::ReplicaPolicy;
use crate::binding::{BindOptions, EmptyListPolicy};
use crate::error::SqlWeaveError;
use crate::results::RowShape;
use crate::types::DriverKind;

/// Whether a read that hit a broken connection is tried once more elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadRetry {
    Never,
    #[default]
    Once,
}

fn default_max_connections() -> usize {
    10
}

fn default_checkout_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_replica_cooldown_ms() -> u64 {
    30_000
}

/// Connection settings for a [`Database`].
///
/// Deserializable so applications can keep it in their own config files:
///
/// ```rust
/// use sqlweave::prelude::*;
///
/// let config: DatabaseConfig = serde_json::from_str(
///     r#"{ "driver": "sqlite", "primary": "app.db", "replicas": ["replica.db"], "max_connections": 4 }"#,
/// )?;
/// assert_eq!(config.max_connections, 4);
/// assert_eq!(config.read_retry, ReadRetry::Once);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    pub driver: DriverKind,
    /// Path (`SQLite`) or connection string (`PostgreSQL`) of the writable primary.
    pub primary: String,
    #[serde(default)]
    pub replicas: Vec<String>,
    /// Per target; the primary and every replica each get their own pool of this size.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub default_shape: RowShape,
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
    #[serde(default)]
    pub statement_timeout_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub replica_policy: ReplicaPolicy,
    #[serde(default = "default_replica_cooldown_ms")]
    pub replica_cooldown_ms: u64,
    #[serde(default)]
    pub read_retry: ReadRetry,
    #[serde(default)]
    pub empty_list: EmptyListPolicy,
}

impl DatabaseConfig {
    #[must_use]
    pub fn new(driver: DriverKind, primary: impl Into<String>) -> Self {
        Self {
            driver,
            primary: primary.into(),
            replicas: Vec::new(),
            max_connections: default_max_connections(),
            default_shape: RowShape::default(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
            statement_timeout_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            replica_policy: ReplicaPolicy::default(),
            replica_cooldown_ms: default_replica_cooldown_ms(),
            read_retry: ReadRetry::default(),
            empty_list: EmptyListPolicy::default(),
        }
    }

    #[must_use]
    pub fn builder(driver: DriverKind, primary: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(driver, primary)
    }

    #[must_use]
    pub fn sqlite_builder(path: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(DriverKind::Sqlite, path)
    }

    #[must_use]
    pub fn postgres_builder(connection_string: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(DriverKind::Postgres, connection_string)
    }

    #[must_use]
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }

    #[must_use]
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn replica_cooldown(&self) -> Duration {
        Duration::from_millis(self.replica_cooldown_ms)
    }

    /// # Errors
    /// `SqlWeaveError::Config` for a zero pool size or an empty target.
    pub fn validate(&self) -> Result<(), SqlWeaveError> {
        if self.max_connections == 0 {
            return Err(SqlWeaveError::Config(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.primary.trim().is_empty() {
            return Err(SqlWeaveError::Config("primary target is empty".into()));
        }
        if let Some(idx) = self.replicas.iter().position(|r| r.trim().is_empty()) {
            return Err(SqlWeaveError::Config(format!(
                "replica #{idx} target is empty"
            )));
        }
        Ok(())
    }

    pub(crate) fn settings(&self, bind: BindOptions) -> Settings {
        Settings {
            bind,
            default_shape: self.default_shape,
            checkout_timeout: self.checkout_timeout(),
            statement_timeout: self.statement_timeout(),
            read_retry: self.read_retry,
            replica_policy: self.replica_policy,
            replica_cooldown: self.replica_cooldown(),
        }
    }
}

/// Runtime knobs shared by the pool, its connections, and statement builders.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) bind: BindOptions,
    pub(crate) default_shape: RowShape,
    pub(crate) checkout_timeout: Duration,
    pub(crate) statement_timeout: Option<Duration>,
    pub(crate) read_retry: ReadRetry,
    pub(crate) replica_policy: ReplicaPolicy,
    pub(crate) replica_cooldown: Duration,
}

/// Fluent builder for [`DatabaseConfig`].
#[derive(Debug, Clone)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    #[must_use]
    pub fn new(driver: DriverKind, primary: impl Into<String>) -> Self {
        Self {
            config: DatabaseConfig::new(driver, primary),
        }
    }

    #[must_use]
    pub fn replica(mut self, target: impl Into<String>) -> Self {
        self.config.replicas.push(target.into());
        self
    }

    #[must_use]
    pub fn replicas<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .replicas
            .extend(targets.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    #[must_use]
    pub fn default_shape(mut self, shape: RowShape) -> Self {
        self.config.default_shape = shape;
        self
    }

    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.config.checkout_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.config.statement_timeout_ms = Some(duration_ms(timeout));
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn replica_policy(mut self, policy: ReplicaPolicy) -> Self {
        self.config.replica_policy = policy;
        self
    }

    #[must_use]
    pub fn replica_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.replica_cooldown_ms = duration_ms(cooldown);
        self
    }

    #[must_use]
    pub fn read_retry(mut self, retry: ReadRetry) -> Self {
        self.config.read_retry = retry;
        self
    }

    #[must_use]
    pub fn empty_list(mut self, policy: EmptyListPolicy) -> Self {
        self.config.empty_list = policy;
        self
    }

    #[must_use]
    pub fn finish(self) -> DatabaseConfig {
        self.config
    }

    /// Build a [`Database`] with the built-in driver for the configured kind.
    ///
    /// # Errors
    /// Returns `SqlWeaveError` if validation, pool creation, or the primary smoke test fails.
    pub async fn build(self) -> Result<Database, SqlWeaveError> {
        Database::connect(self.finish()).await
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
