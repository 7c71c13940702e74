//! Connection pools for a primary and its read replicas, plus statement routing.
//!
//! Each target gets its own deadpool pool sized by `max_connections`. Reads are routed
//! to healthy replicas, writes and transactions to the primary.

use std::sync::Arc;
use std::time::Instant;

use deadpool::managed::{Object, PoolError, TimeoutType};
use tracing::{debug, info, warn};

use crate::binding::BindOptions;
use crate::driver::{self, Driver};
use crate::error::SqlWeaveError;
use crate::query_builder::QueryBuilder;
use crate::transaction::Transaction;
use crate::types::Role;

mod config;
mod connection;
mod health;
mod manager;
pub mod router;

pub use config::{DatabaseConfig, DatabaseConfigBuilder, ReadRetry};
pub(crate) use config::Settings;
pub use connection::{ManagedConnection, PooledConnection};
pub use manager::{ConnectionManager, ConnectionPool};
pub use router::{Intent, ReplicaPolicy, ReplicaView, RouteInput, Target, route};

use health::ReplicaHealth;

/// Size and occupancy of one target's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub target: Target,
    pub max_size: usize,
    /// Connections currently open (idle or checked out).
    pub size: usize,
    /// Idle connections ready for checkout.
    pub available: usize,
    /// Callers queued for a connection.
    pub waiting: usize,
}

/// Pooled access to a primary database and optional read replicas.
///
/// Cheap to clone; every clone shares the same pools.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    primary: ConnectionPool,
    replicas: Vec<ConnectionPool>,
    health: Arc<ReplicaHealth>,
    settings: Arc<Settings>,
    driver: Arc<dyn Driver>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.inner.driver.kind())
            .field("replicas", &self.inner.replicas.len())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Connect with the built-in driver named by `config.driver`.
    ///
    /// # Errors
    /// `Config` for invalid settings or a driver compiled out; `Connection` (or a
    /// transparent driver error) when the primary cannot be reached.
    pub async fn connect(config: DatabaseConfig) -> Result<Self, SqlWeaveError> {
        config.validate()?;
        let driver = driver::builtin(config.driver)?;
        Self::with_driver(config, driver).await
    }

    /// Connect through a caller-supplied driver.
    ///
    /// The primary is smoke-tested and must answer; a replica that fails its smoke
    /// test starts out unhealthy and reads fall back to the primary until its cooldown ends.
    ///
    /// # Errors
    /// Same as [`Database::connect`].
    pub async fn with_driver(
        config: DatabaseConfig,
        driver: Arc<dyn Driver>,
    ) -> Result<Self, SqlWeaveError> {
        config.validate()?;
        let bind = BindOptions::new(driver.placeholder_style()).empty_list(config.empty_list);
        let settings = Arc::new(config.settings(bind));
        let health = Arc::new(ReplicaHealth::new(
            config.replicas.len(),
            settings.replica_cooldown,
        ));

        let build_pool = |target: Target, address: &str| {
            let manager = ConnectionManager::new(
                Arc::clone(&driver),
                target,
                address.to_string(),
                config.connect_timeout(),
            );
            ConnectionPool::builder(manager)
                .max_size(config.max_connections)
                .wait_timeout(Some(config.checkout_timeout()))
                .create_timeout(Some(config.connect_timeout()))
                .runtime(deadpool::Runtime::Tokio1)
                .build()
                .map_err(|e| {
                    SqlWeaveError::Config(format!("failed to build {} pool: {e}", target.role()))
                })
        };

        let primary = build_pool(Target::Primary, &config.primary)?;
        let replicas = config
            .replicas
            .iter()
            .enumerate()
            .map(|(idx, address)| build_pool(Target::Replica(idx), address))
            .collect::<Result<Vec<_>, _>>()?;

        let db = Database {
            inner: Arc::new(DatabaseInner {
                primary,
                replicas,
                health,
                settings,
                driver,
            }),
        };

        // Smoke test: the primary must answer, replicas may start out unhealthy.
        db.smoke_test(Target::Primary).await?;
        for idx in 0..db.inner.replicas.len() {
            if let Err(e) = db.smoke_test(Target::Replica(idx)).await {
                warn!(replica = idx, error = %e, "replica failed startup check");
                db.inner.health.mark_unhealthy(idx, Instant::now());
            }
        }
        info!(
            driver = ?db.inner.driver.kind(),
            replicas = db.inner.replicas.len(),
            max_connections = config.max_connections,
            "database pools ready"
        );
        Ok(db)
    }

    async fn smoke_test(&self, target: Target) -> Result<(), SqlWeaveError> {
        let mut conn = self.checkout_target(target).await?;
        let result = conn.ping().await;
        if result.is_err() {
            conn.mark_unhealthy();
        }
        result
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Start a statement routed by its intent.
    pub fn query<'q>(&self, sql: &'q str) -> QueryBuilder<'q, &Database> {
        QueryBuilder::new(self, sql)
    }

    /// Run multi-statement SQL (DDL, migrations) on the primary.
    ///
    /// # Errors
    /// Checkout errors or the driver's error with the SQL attached.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), SqlWeaveError> {
        let mut conn = self
            .checkout(Role::Primary)
            .await
            .map_err(|e| e.with_sql(sql))?;
        conn.execute_batch(sql).await
    }

    /// Open a transaction on a primary connection.
    ///
    /// # Errors
    /// Checkout errors, or the driver's error if `BEGIN` fails.
    pub async fn begin(&self) -> Result<Transaction<'static>, SqlWeaveError> {
        let conn = self.checkout(Role::Primary).await?;
        Transaction::begin_root(conn).await
    }

    /// Check out a connection of the given role.
    ///
    /// `Role::Replica` goes through routing, so it yields the primary when no
    /// replica is healthy.
    ///
    /// # Errors
    /// `PoolExhausted` when nothing frees up within the checkout timeout.
    pub async fn checkout(&self, role: Role) -> Result<PooledConnection, SqlWeaveError> {
        match role {
            Role::Primary => self.checkout_target(Target::Primary).await,
            Role::Replica => self.checkout_for(Intent::Read, false).await,
        }
    }

    /// Check out a connection for a statement of `intent`.
    ///
    /// # Errors
    /// `PoolExhausted` when nothing frees up within the checkout timeout.
    pub async fn checkout_for(
        &self,
        intent: Intent,
        in_transaction: bool,
    ) -> Result<PooledConnection, SqlWeaveError> {
        let target = self.pick(intent, in_transaction);
        match (target, self.checkout_target(target).await) {
            (Target::Replica(idx), Err(e)) if e.is_connection_error() => {
                warn!(replica = idx, error = %e, "replica checkout failed; using primary");
                self.inner.health.mark_unhealthy(idx, Instant::now());
                self.checkout_target(Target::Primary).await
            }
            (_, result) => result,
        }
    }

    /// Return a connection to its pool, evicting it right away if it is unhealthy.
    pub fn checkin(&self, conn: PooledConnection) {
        if conn.is_healthy() && !conn.in_transaction() {
            drop(conn);
        } else {
            debug!(pool = ?conn.target(), "detaching connection on checkin");
            let _ = Object::take(conn.into_object());
        }
    }

    fn pick(&self, intent: Intent, in_transaction: bool) -> Target {
        let now = Instant::now();
        let replicas = self.inner.health.snapshot(now);
        let cursor = if self.settings().replica_policy == ReplicaPolicy::RoundRobin
            && intent == Intent::Read
        {
            self.inner.health.next_cursor()
        } else {
            0
        };
        let chosen = route(&RouteInput {
            intent,
            in_transaction,
            replicas: &replicas,
            cursor,
            policy: self.settings().replica_policy,
        });
        if let Target::Replica(idx) = chosen {
            self.inner.health.mark_used(idx, now);
        }
        debug!(?intent, pool = ?chosen, "routed statement");
        chosen
    }

    async fn checkout_target(&self, target: Target) -> Result<PooledConnection, SqlWeaveError> {
        let pool = match target {
            Target::Primary => &self.inner.primary,
            Target::Replica(idx) => self.inner.replicas.get(idx).ok_or_else(|| {
                SqlWeaveError::Config(format!("no replica #{idx} configured"))
            })?,
        };
        let object = pool.get().await.map_err(|e| self.pool_error(target, e))?;
        Ok(PooledConnection::new(
            object,
            Arc::clone(&self.inner.settings),
            Arc::clone(&self.inner.health),
        ))
    }

    fn pool_error(&self, target: Target, err: PoolError<SqlWeaveError>) -> SqlWeaveError {
        match err {
            PoolError::Timeout(TimeoutType::Wait) => {
                debug!(pool = ?target, "checkout timed out");
                SqlWeaveError::PoolExhausted {
                    sql: String::new(),
                    role: target.role(),
                    timeout: self.settings().checkout_timeout,
                }
            }
            PoolError::Timeout(TimeoutType::Create) => SqlWeaveError::connection(
                "",
                format!("opening a {} connection timed out", target.role()),
            ),
            PoolError::Timeout(TimeoutType::Recycle) => SqlWeaveError::connection(
                "",
                format!("recycling a {} connection timed out", target.role()),
            ),
            PoolError::Backend(e) => e,
            PoolError::Closed => {
                SqlWeaveError::connection("", format!("{} pool is closed", target.role()))
            }
            other => SqlWeaveError::connection("", other.to_string()),
        }
    }

    /// Per-target pool occupancy, primary first.
    #[must_use]
    pub fn status(&self) -> Vec<PoolStatus> {
        let primary = std::iter::once((Target::Primary, &self.inner.primary));
        let replicas = self
            .inner
            .replicas
            .iter()
            .enumerate()
            .map(|(idx, pool)| (Target::Replica(idx), pool));
        primary
            .chain(replicas)
            .map(|(target, pool)| {
                let status = pool.status();
                PoolStatus {
                    target,
                    max_size: status.max_size,
                    size: status.size,
                    available: status.available,
                    waiting: status.waiting,
                }
            })
            .collect()
    }

    /// Close every pool; later checkouts fail and idle connections are dropped.
    pub fn close(&self) {
        self.inner.primary.close();
        for pool in &self.inner.replicas {
            pool.close();
        }
        info!("database pools closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.primary.is_closed()
    }
}
