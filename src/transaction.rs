//! Transaction scopes over a single primary connection.
//!
//! A root [`Transaction`] owns its connection until it commits, rolls back or is
//! dropped; a nested one (a savepoint) borrows the parent's connection, so the borrow
//! checker keeps the parent idle while the child is alive.

use std::fmt;

use tracing::{debug, warn};

use crate::binding::BindOptions;
use crate::error::SqlWeaveError;
use crate::pool::PooledConnection;
use crate::query_builder::QueryBuilder;
use crate::results::RowShape;

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Active => f.write_str("active"),
            TxState::Committed => f.write_str("committed"),
            TxState::RolledBack => f.write_str("rolled back"),
        }
    }
}

enum TxConn<'c> {
    Owned(Option<PooledConnection>),
    Borrowed(&'c mut PooledConnection),
}

/// A unit of work that commits or rolls back as a whole.
///
/// Dropping an active transaction rolls it back: a root transaction spawns the
/// `ROLLBACK` on the current tokio runtime before the connection returns to the pool,
/// a nested one queues its savepoint rollback ahead of the parent's next statement.
///
/// ```rust,no_run
/// use sqlweave::prelude::*;
///
/// # async fn demo(db: Database) -> Result<(), SqlWeaveError> {
/// let mut tx = db.begin().await?;
/// tx.query("insert into audit (msg) values (:msg)")
///     .bind("msg", "created")
///     .execute()
///     .await?;
/// tx.commit().await?;
/// # Ok(()) }
/// ```
pub struct Transaction<'c> {
    conn: TxConn<'c>,
    state: TxState,
    savepoint: Option<String>,
    bind: BindOptions,
    default_shape: RowShape,
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("savepoint", &self.savepoint)
            .finish_non_exhaustive()
    }
}

impl Transaction<'static> {
    pub(crate) async fn begin_root(mut conn: PooledConnection) -> Result<Self, SqlWeaveError> {
        conn.execute_batch("BEGIN").await?;
        conn.set_in_transaction(true);
        debug!("transaction started");
        let bind = conn.settings().bind;
        let default_shape = conn.settings().default_shape;
        Ok(Self {
            conn: TxConn::Owned(Some(conn)),
            state: TxState::Active,
            savepoint: None,
            bind,
            default_shape,
        })
    }
}

impl<'c> Transaction<'c> {
    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Whether this scope is a savepoint inside another transaction.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.savepoint.is_some()
    }

    pub(crate) fn bind_options(&self) -> BindOptions {
        self.bind
    }

    pub(crate) fn default_shape(&self) -> RowShape {
        self.default_shape
    }

    fn connection(&mut self) -> Option<&mut PooledConnection> {
        match &mut self.conn {
            TxConn::Owned(conn) => conn.as_mut(),
            TxConn::Borrowed(conn) => Some(&mut **conn),
        }
    }

    pub(crate) fn active_connection(&mut self) -> Result<&mut PooledConnection, SqlWeaveError> {
        if self.state != TxState::Active {
            return Err(SqlWeaveError::Transaction(format!(
                "transaction is already {}",
                self.state
            )));
        }
        self.connection()
            .ok_or_else(|| SqlWeaveError::Transaction("transaction has no connection".into()))
    }

    /// Start a statement inside this transaction.
    pub fn query<'q>(&mut self, sql: &'q str) -> QueryBuilder<'q, &mut Transaction<'c>> {
        QueryBuilder::new(self, sql)
    }

    /// Run parameterless multi-statement SQL inside this transaction.
    ///
    /// # Errors
    /// `Transaction` when the scope is finished, otherwise the driver's error.
    pub async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        self.active_connection()?.execute_batch(sql).await
    }

    /// Open a nested scope backed by a savepoint.
    ///
    /// # Errors
    /// `Transaction` when this scope is finished, otherwise the driver's error.
    pub async fn begin(&mut self) -> Result<Transaction<'_>, SqlWeaveError> {
        let bind = self.bind;
        let default_shape = self.default_shape;
        let conn = self.active_connection()?;
        let name = conn.next_savepoint();
        conn.execute_batch(&format!("SAVEPOINT {name}")).await?;
        debug!(savepoint = %name, "savepoint created");
        Ok(Transaction {
            conn: TxConn::Borrowed(conn),
            state: TxState::Active,
            savepoint: Some(name),
            bind,
            default_shape,
        })
    }

    /// Make the work durable (or release the savepoint) and give the connection back.
    ///
    /// # Errors
    /// `Transaction` when the scope is finished or the commit fails; a failed commit
    /// leaves the scope rolled back and its connection marked for eviction.
    pub async fn commit(mut self) -> Result<(), SqlWeaveError> {
        let sql = match &self.savepoint {
            Some(name) => format!("RELEASE SAVEPOINT {name}"),
            None => "COMMIT".to_string(),
        };
        self.finish(&sql, TxState::Committed).await
    }

    /// Discard the work (back to the savepoint when nested).
    ///
    /// # Errors
    /// `Transaction` when the scope is finished or the rollback fails.
    pub async fn rollback(mut self) -> Result<(), SqlWeaveError> {
        let sql = match &self.savepoint {
            Some(name) => format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"),
            None => "ROLLBACK".to_string(),
        };
        self.finish(&sql, TxState::RolledBack).await
    }

    async fn finish(&mut self, sql: &str, outcome: TxState) -> Result<(), SqlWeaveError> {
        let is_root = self.savepoint.is_none();
        let conn = self.active_connection()?;
        if is_root && outcome == TxState::RolledBack {
            // the whole transaction goes away, savepoints included
            conn.clear_pending();
        }
        let result = conn.execute_batch(sql).await;
        match result {
            Ok(()) => {
                if is_root {
                    conn.set_in_transaction(false);
                }
                debug!(state = %outcome, nested = !is_root, "transaction finished");
                self.state = outcome;
                Ok(())
            }
            Err(e) => {
                conn.mark_unhealthy();
                warn!(sql, error = %e, "transaction finish failed; evicting connection");
                self.state = TxState::RolledBack;
                Err(SqlWeaveError::Transaction(format!("{sql} failed: {e}")))
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TxState::Active {
            return;
        }
        self.state = TxState::RolledBack;
        match &mut self.conn {
            TxConn::Borrowed(conn) => match self.savepoint.take() {
                Some(name) => {
                    debug!(savepoint = %name, "savepoint dropped while active; queueing rollback");
                    conn.defer(format!(
                        "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
                    ));
                }
                None => conn.mark_unhealthy(),
            },
            TxConn::Owned(slot) => {
                let Some(mut conn) = slot.take() else {
                    return;
                };
                conn.clear_pending();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    warn!("transaction dropped while active; rolling back");
                    handle.spawn(async move {
                        match conn.execute_batch("ROLLBACK").await {
                            Ok(()) => conn.set_in_transaction(false),
                            Err(e) => {
                                warn!(error = %e, "rollback after drop failed");
                                conn.mark_unhealthy();
                            }
                        }
                    });
                } else {
                    warn!("transaction dropped outside a tokio runtime; evicting connection");
                    conn.mark_unhealthy();
                }
            }
        }
    }
}

/// Run a block inside a transaction on `db`.
///
/// Commits when the block evaluates to `Ok`, rolls back when it evaluates to `Err`
/// (including an early `?`). Begin and commit failures propagate with `?`, so the
/// enclosing function must return `Result<_, SqlWeaveError>`.
///
/// ```rust,no_run
/// use sqlweave::prelude::*;
///
/// # async fn demo(db: Database) -> Result<(), SqlWeaveError> {
/// let moved = sqlweave::transaction!(db, tx, {
///     tx.query("update accounts set balance = balance - :amt where id = :from")
///         .bind("amt", 10)
///         .bind("from", 1)
///         .execute()
///         .await?;
///     tx.query("update accounts set balance = balance + :amt where id = :to")
///         .bind("amt", 10)
///         .bind("to", 2)
///         .execute()
///         .await
/// })?;
/// assert_eq!(moved, 1);
/// # Ok(()) }
/// ```
#[macro_export]
macro_rules! transaction {
    ($db:expr, $tx:ident, $body:block) => {{
        let mut $tx = ($db).begin().await?;
        let __sqlweave_tx_result: ::std::result::Result<_, $crate::SqlWeaveError> =
            async { $body }.await;
        match __sqlweave_tx_result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(error) => match $tx.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::SqlWeaveError::Transaction(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}
