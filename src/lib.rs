//! Templated SQL with optional blocks, whitelisted clauses and pooled, replica-aware execution.
//!
//! A statement is written once as a template. Blocks in `{ ... }` drop out when the
//! parameters they mention are not bound, lists expand into one marker per element,
//! and the result is rewritten into the driver's native placeholder syntax:
//!
//! ```rust,no_run
//! use sqlweave::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlWeaveError> {
//! let db = DatabaseConfig::sqlite_builder("app.db")
//!     .replica("replica.db")
//!     .max_connections(4)
//!     .build()
//!     .await?;
//!
//! let rows = db
//!     .query("select id, name from users where org = :org { and team = :team } order by id")
//!     .bind("org", 7)
//!     .bind_opt("team", None::<i64>)
//!     .all()
//!     .await?;
//! println!("{} users", rows.len());
//! # Ok(()) }
//! ```

pub mod binding;
pub mod clause;
pub mod driver;
pub mod error;
pub mod executor;
pub mod pool;
pub mod prelude;
pub mod query_builder;
pub mod results;
pub mod template;
pub mod transaction;
pub mod types;

pub use binding::{BindOptions, Param, Params, PlaceholderStyle, QueryAndParams, bind};
pub use clause::{ClauseBuilder, Direction, Fragment};
pub use error::SqlWeaveError;
pub use executor::Executor;
pub use pool::{Database, DatabaseConfig, DatabaseConfigBuilder, PoolStatus, PooledConnection};
pub use query_builder::QueryBuilder;
pub use results::{Materialized, Record, ResultSet, ResultShape, Row, RowKey, RowShape, Rows};
pub use template::Template;
pub use transaction::{Transaction, TxState};
pub use types::{DriverKind, Role, RowValues};
