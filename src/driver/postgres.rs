use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{CancelToken, Client, NoTls, Statement};
use tokio_util::bytes;
use tracing::{debug, warn};

use super::{Driver, DriverConnection, StatementCanceller};
use crate::error::SqlWeaveError;
use crate::results::ResultSet;
use crate::types::{DriverKind, RowValues};

/// `PostgreSQL` through `tokio-postgres` (no TLS).
#[derive(Debug, Clone, Default)]
pub struct PostgresDriver;

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Postgres
    }

    async fn connect(&self, target: &str) -> Result<Box<dyn DriverConnection>, SqlWeaveError> {
        let (client, connection) = tokio_postgres::connect(target, NoTls)
            .await
            .map_err(|e| SqlWeaveError::connection("", format!("postgres connect error: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection task ended");
            }
        });
        debug!("opened postgres connection");
        let cancel = Arc::new(PostgresCancel(client.cancel_token()));
        Ok(Box::new(PostgresConnection { client, cancel }))
    }
}

pub struct PostgresConnection {
    client: Client,
    cancel: Arc<PostgresCancel>,
}

struct PostgresCancel(CancelToken);

#[async_trait]
impl StatementCanceller for PostgresCancel {
    async fn cancel(&self) -> Result<(), SqlWeaveError> {
        self.0
            .cancel_query(NoTls)
            .await
            .map_err(|e| SqlWeaveError::connection("", format!("postgres cancel error: {e}")))
    }
}

/// Split driver failures: server-reported errors are query errors, everything
/// else means the connection can no longer be trusted.
fn classify(sql: &str, err: &tokio_postgres::Error) -> SqlWeaveError {
    if let Some(db_error) = err.as_db_error() {
        return SqlWeaveError::query(sql, db_error.message());
    }
    let io_failure = err
        .source()
        .is_some_and(|source| source.is::<std::io::Error>());
    if err.is_closed() || io_failure {
        SqlWeaveError::connection(sql, err.to_string())
    } else {
        SqlWeaveError::query(sql, err.to_string())
    }
}

fn as_refs(params: &[RowValues]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Build a result set using statement metadata for column names.
fn build_result_set(
    stmt: &Statement,
    rows: &[tokio_postgres::Row],
) -> Result<ResultSet, tokio_postgres::Error> {
    let column_names: Vec<String> = stmt
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(column_names);

    for row in rows {
        let mut row_values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            row_values.push(postgres_extract_value(row, idx)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns the driver error if the column cannot be decoded.
pub fn postgres_extract_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<RowValues, tokio_postgres::Error> {
    let type_info = row.columns()[idx].type_();

    Ok(match type_info.name() {
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)?
            .map_or(RowValues::Null, RowValues::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Float(f64::from(v))),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)?
            .map_or(RowValues::Null, RowValues::Float),
        "bool" => row
            .try_get::<_, Option<bool>>(idx)?
            .map_or(RowValues::Null, RowValues::Bool),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map_or(RowValues::Null, RowValues::Timestamp),
        "json" | "jsonb" => row
            .try_get::<_, Option<Value>>(idx)?
            .map_or(RowValues::Null, RowValues::JSON),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map_or(RowValues::Null, RowValues::Blob),
        // text, varchar, bpchar, name and anything else that decodes as a string
        _ => row
            .try_get::<_, Option<String>>(idx)?
            .map_or(RowValues::Null, RowValues::Text),
    })
}

#[async_trait]
impl DriverConnection for PostgresConnection {
    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| classify(sql, &e))
    }

    async fn execute_select(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlWeaveError> {
        let stmt = self
            .client
            .prepare(query)
            .await
            .map_err(|e| classify(query, &e))?;
        let rows = self
            .client
            .query(&stmt, &as_refs(params))
            .await
            .map_err(|e| classify(query, &e))?;
        build_result_set(&stmt, &rows).map_err(|e| classify(query, &e))
    }

    async fn execute_dml(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlWeaveError> {
        let rows = self
            .client
            .execute(query, &as_refs(params))
            .await
            .map_err(|e| classify(query, &e))?;
        usize::try_from(rows).map_err(|e| {
            SqlWeaveError::query(query, format!("affected rows conversion error: {e}"))
        })
    }

    async fn ping(&mut self) -> Result<(), SqlWeaveError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| SqlWeaveError::connection("SELECT 1", e.to_string()))
    }

    fn canceller(&self) -> Option<Arc<dyn StatementCanceller>> {
        Some(Arc::clone(&self.cancel) as Arc<dyn StatementCanceller>)
    }
}

impl ToSql for RowValues {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            RowValues::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                _ => (*i).to_sql(ty, out),
            },
            RowValues::Float(f) => match *ty {
                #[allow(clippy::cast_possible_truncation)]
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => (*f).to_sql(ty, out),
            },
            RowValues::Text(s) => s.to_sql(ty, out),
            RowValues::Bool(b) => (*b).to_sql(ty, out),
            RowValues::Timestamp(dt) => dt.to_sql(ty, out),
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::JSON(jsval) => jsval.to_sql(ty, out),
            RowValues::Blob(bytes) => bytes.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}
