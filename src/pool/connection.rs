use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use deadpool::managed::Object;
use tracing::{debug, warn};

use super::config::Settings;
use super::health::ReplicaHealth;
use super::manager::ConnectionManager;
use super::router::Target;
use crate::binding::QueryAndParams;
use crate::driver::DriverConnection;
use crate::error::SqlWeaveError;
use crate::query_builder::QueryBuilder;
use crate::results::ResultSet;
use crate::types::Role;

/// What the pool stores: a driver connection plus its bookkeeping.
pub struct ManagedConnection {
    pub(crate) target: Target,
    pub(crate) inner: Box<dyn DriverConnection>,
    pub(crate) healthy: bool,
    pub(crate) in_transaction: bool,
    /// Statements to run before the next caller statement (abandoned savepoints).
    pub(crate) pending: Vec<String>,
    savepoints: usize,
}

impl ManagedConnection {
    pub(crate) fn new(target: Target, inner: Box<dyn DriverConnection>) -> Self {
        Self {
            target,
            inner,
            healthy: true,
            in_transaction: false,
            pending: Vec::new(),
            savepoints: 0,
        }
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("target", &self.target)
            .field("healthy", &self.healthy)
            .field("in_transaction", &self.in_transaction)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// One unit of work handed to a driver connection.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Statement<'a> {
    Select(&'a QueryAndParams),
    Dml(&'a QueryAndParams),
    Batch(&'a str),
}

impl<'a> Statement<'a> {
    pub(crate) fn sql(self) -> &'a str {
        match self {
            Statement::Select(qp) | Statement::Dml(qp) => &qp.query,
            Statement::Batch(sql) => sql,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Rows(ResultSet),
    Affected(usize),
    Done,
}

impl Outcome {
    pub(crate) fn into_rows(self) -> ResultSet {
        match self {
            Outcome::Rows(rows) => rows,
            Outcome::Affected(_) | Outcome::Done => ResultSet::default(),
        }
    }

    pub(crate) fn affected(self) -> usize {
        match self {
            Outcome::Affected(count) => count,
            Outcome::Rows(rows) => rows.rows_affected,
            Outcome::Done => 0,
        }
    }
}

/// A connection checked out of a [`crate::Database`] pool.
///
/// Dropping it (or passing it to [`crate::Database::checkin`]) returns it; a connection
/// marked unhealthy is evicted instead of being handed out again.
pub struct PooledConnection {
    object: Object<ConnectionManager>,
    settings: Arc<Settings>,
    health: Arc<ReplicaHealth>,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &*self.object)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub(crate) fn new(
        object: Object<ConnectionManager>,
        settings: Arc<Settings>,
        health: Arc<ReplicaHealth>,
    ) -> Self {
        Self {
            object,
            settings,
            health,
        }
    }

    pub(crate) fn into_object(self) -> Object<ConnectionManager> {
        self.object
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.object.target.role()
    }

    #[must_use]
    pub fn target(&self) -> Target {
        self.object.target
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.object.healthy
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.object.in_transaction
    }

    /// Flag this connection for eviction when it is returned.
    pub fn mark_unhealthy(&mut self) {
        self.object.healthy = false;
    }

    /// Connection-level failure: evict the connection and, on a replica, start its cooldown.
    fn mark_broken(&mut self) {
        self.mark_unhealthy();
        if let Target::Replica(idx) = self.object.target {
            self.health.mark_unhealthy(idx, Instant::now());
        }
    }

    pub(crate) fn set_in_transaction(&mut self, in_transaction: bool) {
        self.object.in_transaction = in_transaction;
    }

    pub(crate) fn next_savepoint(&mut self) -> String {
        self.object.savepoints += 1;
        format!("sqlweave_sp_{}", self.object.savepoints)
    }

    pub(crate) fn defer(&mut self, sql: String) {
        self.object.pending.push(sql);
    }

    pub(crate) fn clear_pending(&mut self) {
        self.object.pending.clear();
    }

    /// Liveness probe through the driver.
    ///
    /// # Errors
    /// The driver's error; a connection failure also marks this connection for eviction.
    pub async fn ping(&mut self) -> Result<(), SqlWeaveError> {
        let result = self.object.inner.ping().await;
        if let Err(e) = &result
            && e.is_connection_error()
        {
            self.mark_broken();
        }
        result
    }

    /// Start a statement on this connection.
    pub fn query<'q>(&mut self, sql: &'q str) -> QueryBuilder<'q, &mut PooledConnection> {
        QueryBuilder::new(self, sql)
    }

    /// Run raw multi-statement SQL without parameters.
    ///
    /// # Errors
    /// Returns the driver's error with the SQL attached.
    pub async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        self.run(Statement::Batch(sql)).await.map(|_| ())
    }

    pub(crate) async fn select(&mut self, query: &QueryAndParams) -> Result<ResultSet, SqlWeaveError> {
        self.run(Statement::Select(query))
            .await
            .map(Outcome::into_rows)
    }

    pub(crate) async fn dml(&mut self, query: &QueryAndParams) -> Result<usize, SqlWeaveError> {
        self.run(Statement::Dml(query)).await.map(Outcome::affected)
    }

    /// Flush deferred statements, then run `statement`.
    pub(crate) async fn run(&mut self, statement: Statement<'_>) -> Result<Outcome, SqlWeaveError> {
        self.flush_pending().await?;
        self.dispatch(statement).await
    }

    async fn flush_pending(&mut self) -> Result<(), SqlWeaveError> {
        if self.object.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.object.pending);
        for sql in &pending {
            debug!(sql = %sql, "rolling back abandoned savepoint");
            if let Err(e) = self.dispatch(Statement::Batch(sql)).await {
                self.mark_unhealthy();
                return Err(SqlWeaveError::Transaction(format!(
                    "failed to roll back abandoned savepoint: {e}"
                )));
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, statement: Statement<'_>) -> Result<Outcome, SqlWeaveError> {
        let sql = statement.sql();
        let limit = self.settings.statement_timeout;
        let canceller = limit.and_then(|_| self.object.inner.canceller());

        let conn = self.object.inner.as_mut();
        let work = async move {
            match statement {
                Statement::Select(qp) => conn
                    .execute_select(&qp.query, &qp.params)
                    .await
                    .map(Outcome::Rows),
                Statement::Dml(qp) => conn
                    .execute_dml(&qp.query, &qp.params)
                    .await
                    .map(Outcome::Affected),
                Statement::Batch(sql) => conn.execute_batch(sql).await.map(|()| Outcome::Done),
            }
        };

        let result = match limit {
            None => work.await,
            Some(limit) => {
                let timed = tokio::time::timeout(limit, work).await;
                if let Ok(result) = timed {
                    result
                } else {
                    warn!(sql, timeout_ms = limit.as_millis(), "statement timed out; cancelling");
                    if let Some(canceller) = canceller
                        && let Err(e) = canceller.cancel().await
                    {
                        warn!(error = %e, "statement cancel failed");
                    }
                    self.mark_unhealthy();
                    return Err(SqlWeaveError::StatementTimeout {
                        sql: sql.to_string(),
                        timeout: limit,
                    });
                }
            }
        };

        match &result {
            Err(e) if e.is_connection_error() => {
                warn!(sql, error = %e, role = %self.role(), "connection failure");
                self.mark_broken();
            }
            Ok(_) => {
                if let Target::Replica(idx) = self.object.target {
                    self.health.mark_healthy(idx);
                }
            }
            Err(_) => {}
        }
        result.map_err(|e| e.with_sql(sql))
    }
}
