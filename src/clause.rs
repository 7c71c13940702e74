//! Whitelist-validated dynamic SQL fragments (sort orders, column lists).
//!
//! Callers pass semantic keys such as `"name"`; only expressions registered up front
//! ever reach the SQL text.
//!
//! ```rust
//! use sqlweave::clause::ClauseBuilder;
//!
//! let sortable = ClauseBuilder::new([("name", "u.name"), ("age", "u.age")]);
//! let order = sortable.order_by([("name", "desc"), ("age", "asc")])?;
//! assert_eq!(order.as_sql(), "u.name DESC, u.age ASC");
//! assert!(sortable.order_by([("password", "asc")]).is_err());
//! # Ok::<(), sqlweave::SqlWeaveError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SqlWeaveError;

/// Sort direction for ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    #[must_use]
    pub fn to_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = SqlWeaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Direction::Asc),
            "desc" | "descending" => Ok(Direction::Desc),
            other => Err(SqlWeaveError::Clause(format!(
                "invalid sort direction '{other}'"
            ))),
        }
    }
}

/// SQL text that passed whitelist validation.
///
/// Only [`ClauseBuilder`] can construct one; the resolver splices it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment(String);

impl Fragment {
    pub(crate) fn new(sql: String) -> Self {
        Self(sql)
    }

    #[must_use]
    pub fn as_sql(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable map of semantic key → trusted SQL expression.
#[derive(Debug, Clone, Default)]
pub struct ClauseBuilder {
    expressions: HashMap<String, String>,
}

impl ClauseBuilder {
    pub fn new<I, K, V>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            expressions: whitelist
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    fn expression(&self, key: &str) -> Result<&str, SqlWeaveError> {
        self.expressions
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| SqlWeaveError::Clause(format!("unknown clause key '{key}'")))
    }

    /// Build an ORDER BY list from `(key, direction)` pairs.
    ///
    /// # Errors
    /// `SqlWeaveError::Clause` for an unknown key, an unrecognized direction, or no pairs.
    pub fn order_by<I, K, D>(&self, pairs: I) -> Result<Fragment, SqlWeaveError>
    where
        I: IntoIterator<Item = (K, D)>,
        K: AsRef<str>,
        D: AsRef<str>,
    {
        let mut items = Vec::new();
        for (key, direction) in pairs {
            let expression = self.expression(key.as_ref())?;
            let direction: Direction = direction.as_ref().parse()?;
            items.push(format!("{expression} {}", direction.to_sql()));
        }
        if items.is_empty() {
            return Err(SqlWeaveError::Clause("order_by needs at least one key".into()));
        }
        Ok(Fragment::new(items.join(", ")))
    }

    /// Comma-joined expressions for a dynamic select list.
    ///
    /// # Errors
    /// `SqlWeaveError::Clause` for an unknown key or no keys.
    pub fn columns<I, K>(&self, keys: I) -> Result<Fragment, SqlWeaveError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let items = keys
            .into_iter()
            .map(|key| self.expression(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if items.is_empty() {
            return Err(SqlWeaveError::Clause("columns needs at least one key".into()));
        }
        Ok(Fragment::new(items.join(", ")))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.expressions.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> ClauseBuilder {
        ClauseBuilder::new([("name", "u.name"), ("created", "u.created_at")])
    }

    #[test]
    fn single_key_desc() {
        let fragment = users().order_by([("name", "desc")]).unwrap();
        assert_eq!(fragment.as_sql(), "u.name DESC");
    }

    #[test]
    fn directions_are_case_insensitive() {
        let fragment = users()
            .order_by([("name", "Ascending"), ("created", "DESCENDING")])
            .unwrap();
        assert_eq!(fragment.as_sql(), "u.name ASC, u.created_at DESC");
    }

    #[test]
    fn unknown_key_and_bad_direction_fail() {
        let err = users().order_by([("password", "asc")]).unwrap_err();
        assert!(matches!(err, SqlWeaveError::Clause(msg) if msg.contains("password")));
        let err = users().order_by([("name", "sideways")]).unwrap_err();
        assert!(matches!(err, SqlWeaveError::Clause(_)));
    }

    #[test]
    fn empty_input_fails() {
        let none: [(&str, &str); 0] = [];
        assert!(users().order_by(none).is_err());
        assert!(users().columns(Vec::<String>::new()).is_err());
    }

    #[test]
    fn columns_emit_whitelisted_expressions() {
        let fragment = users().columns(["created", "name"]).unwrap();
        assert_eq!(fragment.to_string(), "u.created_at, u.name");
    }
}
