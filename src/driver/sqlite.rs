use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{InterruptHandle, Statement, ToSql};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Driver, DriverConnection, StatementCanceller};
use crate::error::SqlWeaveError;
use crate::results::ResultSet;
use crate::types::{DriverKind, RowValues};

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// `SQLite` through `rusqlite`; every call runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    busy_timeout: Duration,
    wal: bool,
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }
}

impl SqliteDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Toggle `PRAGMA journal_mode = WAL` on connect (on by default).
    #[must_use]
    pub fn wal(mut self, enabled: bool) -> Self {
        self.wal = enabled;
        self
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn connect(&self, target: &str) -> Result<Box<dyn DriverConnection>, SqlWeaveError> {
        let path = target.to_string();
        let busy_timeout = self.busy_timeout;
        let wal = self.wal;
        let (conn, interrupt) = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path).map_err(|e| {
                SqlWeaveError::connection("", format!("failed to open sqlite database {path}: {e}"))
            })?;
            conn.busy_timeout(busy_timeout)?;
            if wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            let interrupt = conn.get_interrupt_handle();
            Ok::<_, SqlWeaveError>((conn, interrupt))
        })
        .await
        .map_err(|e| SqlWeaveError::connection("", format!("sqlite spawn_blocking join error: {e}")))??;

        debug!(path = %target, "opened sqlite connection");
        Ok(Box::new(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
            interrupt: Arc::new(SqliteInterrupt(interrupt)),
        }))
    }
}

/// Connection wrapper shared with the blocking pool.
pub struct SqliteConnection {
    conn: SharedSqliteConnection,
    interrupt: Arc<SqliteInterrupt>,
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

struct SqliteInterrupt(InterruptHandle);

#[async_trait]
impl StatementCanceller for SqliteInterrupt {
    async fn cancel(&self) -> Result<(), SqlWeaveError> {
        self.0.interrupt();
        Ok(())
    }
}

pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, SqlWeaveError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlWeaveError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| SqlWeaveError::connection("", format!("sqlite spawn_blocking join error: {e}")))?
}

fn query_error(sql: &str, err: &rusqlite::Error) -> SqlWeaveError {
    SqlWeaveError::query(sql, err.to_string())
}

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns the rusqlite error if the column cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, rusqlite::Error> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

fn build_result_set(stmt: &mut Statement, params: &[Value]) -> Result<ResultSet, rusqlite::Error> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut rows_iter = stmt.query(&param_refs[..])?;
    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(column_names);

    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

fn convert(params: &[RowValues]) -> Vec<Value> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        let sql = sql.to_string();
        run_blocking(Arc::clone(&self.conn), move |conn| {
            conn.execute_batch(&sql).map_err(|e| query_error(&sql, &e))
        })
        .await
    }

    async fn execute_select(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlWeaveError> {
        let query = query.to_string();
        let values = convert(params);
        run_blocking(Arc::clone(&self.conn), move |conn| {
            let mut stmt = conn.prepare(&query).map_err(|e| query_error(&query, &e))?;
            build_result_set(&mut stmt, &values).map_err(|e| query_error(&query, &e))
        })
        .await
    }

    async fn execute_dml(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlWeaveError> {
        let query = query.to_string();
        let values = convert(params);
        run_blocking(Arc::clone(&self.conn), move |conn| {
            conn.execute(&query, rusqlite::params_from_iter(values.iter()))
                .map_err(|e| query_error(&query, &e))
        })
        .await
    }

    async fn ping(&mut self) -> Result<(), SqlWeaveError> {
        run_blocking(Arc::clone(&self.conn), |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| SqlWeaveError::connection("SELECT 1", e.to_string()))
        })
        .await
    }

    fn canceller(&self) -> Option<Arc<dyn StatementCanceller>> {
        Some(Arc::clone(&self.interrupt) as Arc<dyn StatementCanceller>)
    }
}
