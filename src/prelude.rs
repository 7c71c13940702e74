//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to build a [`Database`],
//! bind templates and read results.

pub use crate::binding::{BindOptions, EmptyListPolicy, Param, Params, PlaceholderStyle};
pub use crate::clause::{ClauseBuilder, Direction, Fragment};
pub use crate::error::SqlWeaveError;
pub use crate::pool::{
    Database, DatabaseConfig, DatabaseConfigBuilder, Intent, PooledConnection, ReadRetry,
    ReplicaPolicy,
};
pub use crate::results::{Materialized, Record, ResultShape, Row, RowKey, RowShape, Rows};
pub use crate::transaction::{Transaction, TxState};
pub use crate::types::{DriverKind, Role, RowValues};
