use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "postgres")]
use tokio_postgres;

use crate::types::Role;

/// Which placeholder a binding failure refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingContext {
    /// A `:name` / `$name` placeholder.
    Named(String),
    /// The zero-based positional slot, counted over the included tree.
    Positional(usize),
    /// End-of-resolution count check for positional values.
    Count { consumed: usize, supplied: usize },
}

impl fmt::Display for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingContext::Named(name) => write!(f, "parameter '{name}'"),
            BindingContext::Positional(idx) => write!(f, "positional parameter #{idx}"),
            BindingContext::Count { consumed, supplied } => write!(
                f,
                "positional parameters (template consumed {consumed}, caller supplied {supplied})"
            ),
        }
    }
}

/// Why a placeholder could not be bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingErrorKind {
    /// Named key referenced outside every block but not supplied.
    Missing,
    /// Fewer positional values than included `?` placeholders.
    Shortfall,
    /// More positional values than included `?` placeholders.
    Surplus,
    /// A type tag rejected the supplied value.
    Cast(String),
}

impl fmt::Display for BindingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingErrorKind::Missing => f.write_str("no value bound"),
            BindingErrorKind::Shortfall => f.write_str("not enough positional values"),
            BindingErrorKind::Surplus => f.write_str("too many positional values"),
            BindingErrorKind::Cast(msg) => write!(f, "cast failed: {msg}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SqlWeaveError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Template syntax error at offset {offset}: {message} (template: {template})")]
    TemplateSyntax {
        template: String,
        offset: usize,
        message: String,
    },

    #[error("Binding error for {context}: {kind} (template: {template})")]
    Binding {
        template: String,
        context: BindingContext,
        kind: BindingErrorKind,
    },

    #[error("Invalid parameter {context}: {message} (template: {template})")]
    InvalidParameter {
        template: String,
        context: BindingContext,
        message: String,
    },

    #[error("Clause error: {0}")]
    Clause(String),

    #[error("Pool exhausted: no {role} connection available within {timeout:?} (sql: {sql})")]
    PoolExhausted {
        sql: String,
        role: Role,
        timeout: Duration,
    },

    #[error("Connection error: {message} (sql: {sql})")]
    Connection { sql: String, message: String },

    #[error("Statement timed out after {timeout:?} (sql: {sql})")]
    StatementTimeout { sql: String, timeout: Duration },

    #[error("Query error: {message} (sql: {sql})")]
    Query { sql: String, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Result shape error: {message} (sql: {sql})")]
    ResultShape { sql: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SqlWeaveError {
    pub(crate) fn connection(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            sql: sql.into(),
            message: message.into(),
        }
    }

    pub(crate) fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// The caller may retry after backing off; pool state was not touched.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Failures that poison the connection they happened on.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::StatementTimeout { .. }
        )
    }

    /// The SQL text this error is about, when it has one.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        let text = match self {
            Self::TemplateSyntax { template, .. }
            | Self::Binding { template, .. }
            | Self::InvalidParameter { template, .. } => Some(template),
            Self::PoolExhausted { sql, .. }
            | Self::Connection { sql, .. }
            | Self::StatementTimeout { sql, .. }
            | Self::Query { sql, .. }
            | Self::ResultShape { sql, .. } => Some(sql),
            _ => None,
        };
        text.map(String::as_str).filter(|text| !text.is_empty())
    }

    /// Attach SQL text to errors raised below the statement layer without it.
    pub(crate) fn with_sql(self, statement: &str) -> Self {
        match self {
            Self::PoolExhausted { sql, role, timeout } if sql.is_empty() => Self::PoolExhausted {
                sql: statement.to_string(),
                role,
                timeout,
            },
            Self::Connection { sql, message } if sql.is_empty() => Self::Connection {
                sql: statement.to_string(),
                message,
            },
            Self::Query { sql, message } if sql.is_empty() => Self::Query {
                sql: statement.to_string(),
                message,
            },
            Self::ResultShape { sql, message } if sql.is_empty() => Self::ResultShape {
                sql: statement.to_string(),
                message,
            },
            other => other,
        }
    }
}
