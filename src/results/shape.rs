use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Deserialize;

use super::result_set::ResultSet;
use super::row::{Columns, Record, RowMap};
use crate::error::SqlWeaveError;
use crate::types::RowValues;

/// Hashable projection of a [`RowValues`], used as a dictionary key.
///
/// Floats compare by bit pattern and JSON by its serialized text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Int(i64),
    Float(u64),
    Text(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Null,
    Json(String),
    Blob(Vec<u8>),
}

impl From<&RowValues> for RowKey {
    fn from(value: &RowValues) -> Self {
        match value {
            RowValues::Int(i) => RowKey::Int(*i),
            RowValues::Float(f) => RowKey::Float(f.to_bits()),
            RowValues::Text(s) => RowKey::Text(s.clone()),
            RowValues::Bool(b) => RowKey::Bool(*b),
            RowValues::Timestamp(ts) => RowKey::Timestamp(*ts),
            RowValues::Null => RowKey::Null,
            RowValues::JSON(json) => RowKey::Json(json.to_string()),
            RowValues::Blob(bytes) => RowKey::Blob(bytes.clone()),
        }
    }
}

impl From<RowValues> for RowKey {
    fn from(value: RowValues) -> Self {
        match value {
            RowValues::Text(s) => RowKey::Text(s),
            RowValues::Blob(bytes) => RowKey::Blob(bytes),
            other => RowKey::from(&other),
        }
    }
}

impl From<i64> for RowKey {
    fn from(value: i64) -> Self {
        RowKey::Int(value)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        RowKey::Text(value.to_string())
    }
}

impl From<String> for RowKey {
    fn from(value: String) -> Self {
        RowKey::Text(value)
    }
}

/// Target shape for [`materialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Records,
    Maps,
    /// Exactly one column.
    Column,
    /// First column → remaining columns; later duplicates overwrite.
    Dict,
    /// First column → every row with that key.
    Group,
}

/// A result set converted into the requested shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    Records(Vec<Record>),
    Maps(Vec<RowMap>),
    Column(Vec<RowValues>),
    Dict(HashMap<RowKey, Record>),
    Group(HashMap<RowKey, Vec<Record>>),
}

/// Default per-row representation for `all()` / `one()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowShape {
    #[default]
    Record,
    Map,
}

impl From<RowShape> for ResultShape {
    fn from(shape: RowShape) -> Self {
        match shape {
            RowShape::Record => ResultShape::Records,
            RowShape::Map => ResultShape::Maps,
        }
    }
}

/// Rows in the caller's configured [`RowShape`].
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    Records(Vec<Record>),
    Maps(Vec<RowMap>),
}

impl Rows {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Rows::Records(rows) => rows.len(),
            Rows::Maps(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of `column` in row `index`.
    #[must_use]
    pub fn get(&self, index: usize, column: &str) -> Option<&RowValues> {
        match self {
            Rows::Records(rows) => rows.get(index)?.get(column),
            Rows::Maps(rows) => rows.get(index)?.get(column),
        }
    }

    /// Every row as a map, whatever the shape.
    #[must_use]
    pub fn into_maps(self) -> Vec<RowMap> {
        match self {
            Rows::Records(rows) => rows.into_iter().map(Record::into_map).collect(),
            Rows::Maps(rows) => rows,
        }
    }

    fn first(self) -> Option<Row> {
        match self {
            Rows::Records(rows) => rows.into_iter().next().map(Row::Record),
            Rows::Maps(rows) => rows.into_iter().next().map(Row::Map),
        }
    }
}

/// A single row in the caller's configured [`RowShape`].
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Record(Record),
    Map(RowMap),
}

impl Row {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&RowValues> {
        match self {
            Row::Record(record) => record.get(column),
            Row::Map(map) => map.get(column),
        }
    }
}

/// Convert `result` into `shape`.
///
/// Errors carry no SQL; the statement layer attaches it.
///
/// # Errors
/// `SqlWeaveError::ResultShape` when `Column` sees other than one column, or
/// `Dict` / `Group` see fewer than two.
pub fn materialize(result: ResultSet, shape: ResultShape) -> Result<Materialized, SqlWeaveError> {
    let width = result.column_names().len();
    match shape {
        ResultShape::Records => Ok(Materialized::Records(result.into_records())),
        ResultShape::Maps => Ok(Materialized::Maps(
            result.into_records().into_iter().map(Record::into_map).collect(),
        )),
        ResultShape::Column => {
            if width != 1 {
                return Err(shape_error(format!(
                    "column shape needs exactly one column, result has {width}"
                )));
            }
            Ok(Materialized::Column(
                result
                    .into_records()
                    .into_iter()
                    .filter_map(|record| record.into_values().into_iter().next())
                    .collect(),
            ))
        }
        ResultShape::Dict | ResultShape::Group => {
            if width < 2 {
                return Err(shape_error(format!(
                    "keyed shapes need a key column and at least one value column, result has {width}"
                )));
            }
            let rest = Arc::new(Columns::new(result.column_names()[1..].to_vec()));
            let pairs = result
                .into_records()
                .into_iter()
                .filter_map(|record| record.split_first(&rest))
                .map(|(key, record)| (RowKey::from(key), record));

            if shape == ResultShape::Dict {
                Ok(Materialized::Dict(pairs.collect()))
            } else {
                let mut groups: HashMap<RowKey, Vec<Record>> = HashMap::new();
                for (key, record) in pairs {
                    groups.entry(key).or_default().push(record);
                }
                Ok(Materialized::Group(groups))
            }
        }
    }
}

/// Convert into the configured per-row shape.
#[must_use]
pub fn into_rows(result: ResultSet, shape: RowShape) -> Rows {
    match shape {
        RowShape::Record => Rows::Records(result.into_records()),
        RowShape::Map => Rows::Maps(
            result.into_records().into_iter().map(Record::into_map).collect(),
        ),
    }
}

/// First row in the configured shape, if any.
#[must_use]
pub fn first_row(result: ResultSet, shape: RowShape) -> Option<Row> {
    into_rows(result, shape).first()
}

fn shape_error(message: String) -> SqlWeaveError {
    SqlWeaveError::ResultShape {
        sql: String::new(),
        message,
    }
}
