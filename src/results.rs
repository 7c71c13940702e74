//! Query results and their caller-facing shapes.

mod result_set;
mod row;
mod shape;

pub use result_set::ResultSet;
pub use row::{Columns, Record, RowMap};
pub use shape::{
    Materialized, ResultShape, Row, RowKey, RowShape, Rows, first_row, into_rows, materialize,
};
