//! The wire-level capability the pool sits on.
//!
//! A [`Driver`] opens connections to a target (path or connection string); a
//! [`DriverConnection`] runs already-bound SQL. Both built-in backends live behind
//! cargo features; custom drivers implement the same pair.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::binding::PlaceholderStyle;
use crate::error::SqlWeaveError;
use crate::results::ResultSet;
use crate::types::{DriverKind, RowValues};

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

/// Opens connections for one backend.
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    fn kind(&self) -> DriverKind;

    /// Marker syntax the resolver should emit for this backend.
    fn placeholder_style(&self) -> PlaceholderStyle {
        self.kind().placeholder_style()
    }

    /// Open a new connection to `target`.
    ///
    /// # Errors
    /// `SqlWeaveError::Connection` (or a transparent driver error) when the target is unreachable.
    async fn connect(&self, target: &str) -> Result<Box<dyn DriverConnection>, SqlWeaveError>;
}

/// A single live connection.
///
/// Query methods receive SQL already rewritten into the driver's marker syntax and
/// the matching ordered values.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run one or more statements without parameters (DDL, `BEGIN`, `SAVEPOINT`, ...).
    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlWeaveError>;

    async fn execute_select(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlWeaveError>;

    /// Returns the affected row count.
    async fn execute_dml(&mut self, query: &str, params: &[RowValues])
    -> Result<usize, SqlWeaveError>;

    /// Cheap liveness probe.
    async fn ping(&mut self) -> Result<(), SqlWeaveError>;

    /// Handle that can interrupt a statement running on this connection from elsewhere.
    fn canceller(&self) -> Option<Arc<dyn StatementCanceller>> {
        None
    }
}

/// Interrupts whatever statement its connection is running.
#[async_trait]
pub trait StatementCanceller: Send + Sync {
    async fn cancel(&self) -> Result<(), SqlWeaveError>;
}

/// Resolve the built-in driver for `kind`.
///
/// # Errors
/// `SqlWeaveError::Config` when the driver's cargo feature is disabled.
pub fn builtin(kind: DriverKind) -> Result<Arc<dyn Driver>, SqlWeaveError> {
    match kind {
        #[cfg(feature = "postgres")]
        DriverKind::Postgres => Ok(Arc::new(PostgresDriver::default())),
        #[cfg(feature = "sqlite")]
        DriverKind::Sqlite => Ok(Arc::new(SqliteDriver::default())),
        #[allow(unreachable_patterns)]
        other => Err(SqlWeaveError::Config(format!(
            "driver {other:?} is not compiled in; enable its cargo feature"
        ))),
    }
}
