use std::sync::Arc;

use super::row::{Columns, Record};
use crate::types::RowValues;

/// A result set from a database query
///
/// Rows returned by the driver plus the affected-row count for DML.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<Record>,
    /// The number of rows affected (for DML statements)
    pub rows_affected: usize,
    columns: Arc<Columns>,
}

impl ResultSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            rows_affected: 0,
            columns: Arc::default(),
        }
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Vec<String>) {
        self.columns = Arc::new(Columns::new(column_names));
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    #[must_use]
    pub fn columns(&self) -> &Arc<Columns> {
        &self.columns
    }

    /// Add a row to the result set
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.results
            .push(Record::new(Arc::clone(&self.columns), row_values));
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.results
    }
}
