use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{Manager, Metrics, Pool, RecycleError, RecycleResult};
use tracing::debug;

use super::connection::ManagedConnection;
use super::router::Target;
use crate::driver::Driver;
use crate::error::SqlWeaveError;

/// deadpool manager for one target (the primary or a single replica).
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    target: Target,
    address: String,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        target: Target,
        address: String,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            target,
            address,
            connect_timeout,
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("driver", &self.driver.kind())
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Manager for ConnectionManager {
    type Type = ManagedConnection;
    type Error = SqlWeaveError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let inner = tokio::time::timeout(self.connect_timeout, self.driver.connect(&self.address))
            .await
            .map_err(|_| {
                SqlWeaveError::connection(
                    "",
                    format!(
                        "connecting to {} timed out after {:?}",
                        self.target.role(),
                        self.connect_timeout
                    ),
                )
            })??;
        debug!(pool = ?self.target, "created pooled connection");
        Ok(ManagedConnection::new(self.target, inner))
    }

    async fn recycle(&self, conn: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        if !conn.healthy {
            debug!(pool = ?self.target, "evicting unhealthy connection");
            return Err(RecycleError::Backend(SqlWeaveError::connection(
                "",
                "connection was marked unhealthy",
            )));
        }
        if conn.in_transaction {
            debug!(pool = ?self.target, "evicting connection returned mid-transaction");
            return Err(RecycleError::Backend(SqlWeaveError::Transaction(
                "connection returned to the pool inside a transaction".into(),
            )));
        }
        Ok(())
    }
}

pub type ConnectionPool = Pool<ConnectionManager>;
