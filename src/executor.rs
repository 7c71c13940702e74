use async_trait::async_trait;
use tracing::{debug, warn};

use crate::binding::{BindOptions, QueryAndParams};
use crate::error::SqlWeaveError;
use crate::pool::{Database, Intent, PooledConnection, ReadRetry};
use crate::results::{ResultSet, RowShape};
use crate::transaction::Transaction;

/// Something a [`crate::query_builder::QueryBuilder`] can run bound SQL against.
///
/// Implemented for `&Database` (routed, pooled), `&mut Transaction` (the held
/// connection, in submission order) and `&mut PooledConnection` (one checkout).
#[async_trait]
pub trait Executor: Send {
    /// Marker style and empty-list policy used when binding templates.
    fn bind_options(&self) -> BindOptions;

    /// Row representation for `all()` / `one()` when the builder sets none.
    fn default_shape(&self) -> RowShape;

    /// Run a row-returning statement.
    async fn select(
        &mut self,
        intent: Intent,
        query: &QueryAndParams,
    ) -> Result<ResultSet, SqlWeaveError>;

    /// Run a data-modifying statement; returns the affected row count.
    async fn dml(&mut self, query: &QueryAndParams) -> Result<usize, SqlWeaveError>;

    /// Run parameterless multi-statement SQL.
    async fn batch(&mut self, sql: &str) -> Result<(), SqlWeaveError>;
}

#[async_trait]
impl<'a> Executor for &'a Database {
    fn bind_options(&self) -> BindOptions {
        self.settings().bind
    }

    fn default_shape(&self) -> RowShape {
        self.settings().default_shape
    }

    async fn select(
        &mut self,
        intent: Intent,
        query: &QueryAndParams,
    ) -> Result<ResultSet, SqlWeaveError> {
        let db: &Database = *self;
        let mut conn = db.checkout_for(intent, false).await?;
        match conn.select(query).await {
            Err(e) if retries_read(db, intent, &e) => {
                warn!(
                    sql = %query.query,
                    role = %conn.role(),
                    error = %e,
                    "read failed on a broken connection; retrying once"
                );
                drop(conn);
                let mut retry = db.checkout_for(intent, false).await?;
                retry.select(query).await
            }
            other => other,
        }
    }

    async fn dml(&mut self, query: &QueryAndParams) -> Result<usize, SqlWeaveError> {
        let mut conn = self.checkout_for(Intent::Write, false).await?;
        conn.dml(query).await
    }

    async fn batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        self.execute_batch(sql).await
    }
}

/// Reads outside a transaction get one more try after a connection-level failure.
///
/// Statement timeouts are not retried; the statement may still be running server-side.
fn retries_read(db: &Database, intent: Intent, err: &SqlWeaveError) -> bool {
    intent == Intent::Read
        && db.settings().read_retry == ReadRetry::Once
        && matches!(err, SqlWeaveError::Connection { .. })
}

#[async_trait]
impl<'a, 'c> Executor for &'a mut Transaction<'c> {
    fn bind_options(&self) -> BindOptions {
        Transaction::bind_options(self)
    }

    fn default_shape(&self) -> RowShape {
        Transaction::default_shape(self)
    }

    async fn select(
        &mut self,
        _intent: Intent,
        query: &QueryAndParams,
    ) -> Result<ResultSet, SqlWeaveError> {
        debug!(sql = %query.query, "transaction select");
        self.active_connection()?.select(query).await
    }

    async fn dml(&mut self, query: &QueryAndParams) -> Result<usize, SqlWeaveError> {
        debug!(sql = %query.query, "transaction dml");
        self.active_connection()?.dml(query).await
    }

    async fn batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        self.active_connection()?.execute_batch(sql).await
    }
}

#[async_trait]
impl<'a> Executor for &'a mut PooledConnection {
    fn bind_options(&self) -> BindOptions {
        self.settings().bind
    }

    fn default_shape(&self) -> RowShape {
        self.settings().default_shape
    }

    async fn select(
        &mut self,
        _intent: Intent,
        query: &QueryAndParams,
    ) -> Result<ResultSet, SqlWeaveError> {
        PooledConnection::select(self, query).await
    }

    async fn dml(&mut self, query: &QueryAndParams) -> Result<usize, SqlWeaveError> {
        PooledConnection::dml(self, query).await
    }

    async fn batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        self.execute_batch(sql).await
    }
}
