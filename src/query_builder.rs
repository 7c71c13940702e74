use std::collections::HashMap;

use tracing::trace;

use crate::binding::{self, Param, Params, QueryAndParams};
use crate::clause::Fragment;
use crate::error::SqlWeaveError;
use crate::executor::Executor;
use crate::pool::Intent;
use crate::results::{
    Materialized, Record, ResultSet, ResultShape, Row, RowKey, RowShape, Rows, first_row,
    into_rows, materialize,
};
use crate::types::RowValues;

/// Fluent builder for one templated statement.
///
/// Parameters accumulate on the builder; the template is compiled (through the cache),
/// evaluated and resolved only when a terminal method runs, so template and binding
/// errors surface before any connection is checked out.
pub struct QueryBuilder<'q, E> {
    executor: E,
    sql: &'q str,
    params: Params,
    intent: Option<Intent>,
    shape: Option<RowShape>,
}

impl<'q, E: Executor> QueryBuilder<'q, E> {
    pub(crate) fn new(executor: E, sql: &'q str) -> Self {
        Self {
            executor,
            sql,
            params: Params::new(),
            intent: None,
            shape: None,
        }
    }

    /// Bind a named parameter (`:name` / `$name`).
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Bind only when `value` is `Some`; blocks that need it are elided otherwise.
    #[must_use]
    pub fn bind_opt<T: Into<Param>>(mut self, name: impl Into<String>, value: Option<T>) -> Self {
        self.params = std::mem::take(&mut self.params).bind_opt(name, value);
        self
    }

    /// Bind a list that expands into one marker per element.
    #[must_use]
    pub fn bind_list<I, T>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RowValues>,
    {
        self.params = std::mem::take(&mut self.params).bind_list(name, values);
        self
    }

    /// Bind a whitelisted SQL fragment from a [`crate::clause::ClauseBuilder`].
    #[must_use]
    pub fn bind_fragment(mut self, name: impl Into<String>, fragment: Fragment) -> Self {
        self.params.insert(name, fragment);
        self
    }

    /// Append the next positional (`?`) value.
    #[must_use]
    pub fn push(mut self, value: impl Into<Param>) -> Self {
        self.params.push_mut(value);
        self
    }

    /// Replace every parameter bound so far.
    #[must_use]
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Route to the primary even when the statement reads.
    #[must_use]
    pub fn on_primary(self) -> Self {
        self.intent(Intent::Write)
    }

    /// Override read/write detection.
    #[must_use]
    pub fn intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Row representation for `all()` / `one()`.
    #[must_use]
    pub fn shape(mut self, shape: RowShape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// The final SQL and ordered values, without running anything.
    ///
    /// # Errors
    /// `TemplateSyntax`, `Binding` or `InvalidParameter`.
    pub fn bound(&self) -> Result<QueryAndParams, SqlWeaveError> {
        binding::bind(self.sql, &self.params, &self.executor.bind_options())
    }

    /// Run as a write; returns the affected row count.
    ///
    /// # Errors
    /// Binding errors, checkout errors, or the driver's error with the SQL attached.
    pub async fn execute(mut self) -> Result<usize, SqlWeaveError> {
        let query = self.bound()?;
        trace!(sql = %query.query, params = query.params.len(), "execute");
        self.executor
            .dml(&query)
            .await
            .map_err(|e| e.with_sql(&query.query))
    }

    async fn run_select(&mut self) -> Result<(QueryAndParams, ResultSet), SqlWeaveError> {
        let query = self.bound()?;
        let intent = self
            .intent
            .unwrap_or_else(|| Intent::detect(&query.query));
        trace!(sql = %query.query, params = query.params.len(), ?intent, "select");
        let result = self
            .executor
            .select(intent, &query)
            .await
            .map_err(|e| e.with_sql(&query.query))?;
        Ok((query, result))
    }

    fn row_shape(&self) -> RowShape {
        self.shape
            .unwrap_or_else(|| self.executor.default_shape())
    }

    /// Every row in the configured row shape.
    ///
    /// # Errors
    /// Binding errors, checkout errors, or the driver's error with the SQL attached.
    pub async fn all(mut self) -> Result<Rows, SqlWeaveError> {
        let shape = self.row_shape();
        let (_, result) = self.run_select().await?;
        Ok(into_rows(result, shape))
    }

    /// The first row, if any.
    ///
    /// # Errors
    /// Same as [`QueryBuilder::all`].
    pub async fn one(mut self) -> Result<Option<Row>, SqlWeaveError> {
        let shape = self.row_shape();
        let (_, result) = self.run_select().await?;
        Ok(first_row(result, shape))
    }

    /// Rows materialized into `shape`.
    ///
    /// # Errors
    /// Same as [`QueryBuilder::all`], plus `ResultShape` when the columns do not fit `shape`.
    pub async fn fetch(mut self, shape: ResultShape) -> Result<Materialized, SqlWeaveError> {
        let (query, result) = self.run_select().await?;
        materialize(result, shape).map_err(|e| e.with_sql(&query.query))
    }

    /// The single column of every row.
    ///
    /// # Errors
    /// `ResultShape` unless the result has exactly one column.
    pub async fn column(self) -> Result<Vec<RowValues>, SqlWeaveError> {
        match self.fetch(ResultShape::Column).await? {
            Materialized::Column(values) => Ok(values),
            other => Err(unexpected(&other)),
        }
    }

    /// First column to the remaining columns; a later duplicate key wins.
    ///
    /// # Errors
    /// `ResultShape` when the result has fewer than two columns.
    pub async fn dict(self) -> Result<HashMap<RowKey, Record>, SqlWeaveError> {
        match self.fetch(ResultShape::Dict).await? {
            Materialized::Dict(map) => Ok(map),
            other => Err(unexpected(&other)),
        }
    }

    /// First column to every row carrying that key.
    ///
    /// # Errors
    /// `ResultShape` when the result has fewer than two columns.
    pub async fn group(self) -> Result<HashMap<RowKey, Vec<Record>>, SqlWeaveError> {
        match self.fetch(ResultShape::Group).await? {
            Materialized::Group(map) => Ok(map),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(found: &Materialized) -> SqlWeaveError {
    SqlWeaveError::ResultShape {
        sql: String::new(),
        message: format!("materializer returned an unexpected shape: {found:?}"),
    }
}
