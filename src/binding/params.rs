use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::clause::Fragment;
use crate::types::RowValues;

/// A value supplied for one placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// A scalar (or `RowValues::Null`).
    Value(RowValues),
    /// Expands into one marker per element, e.g. for `IN (...)`.
    List(Vec<RowValues>),
    /// Whitelisted SQL produced by a [`crate::clause::ClauseBuilder`]; spliced as text.
    Fragment(Fragment),
}

macro_rules! scalar_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::Value(value.into())
                }
            }
        )*
    };
}

scalar_param!(
    RowValues,
    i64,
    i32,
    u32,
    f64,
    bool,
    &str,
    String,
    NaiveDateTime,
    JsonValue,
    Vec<u8>,
);

impl<T: Into<RowValues>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        Param::Value(value.into())
    }
}

impl From<Fragment> for Param {
    fn from(fragment: Fragment) -> Self {
        Param::Fragment(fragment)
    }
}

/// Named values plus the positional queue for one statement.
///
/// An explicitly bound `NULL` counts as present when deciding whether a block is
/// included; use [`Params::bind_opt`] to leave a key unbound for `None`.
///
/// ```rust
/// use sqlweave::prelude::*;
///
/// let params = Params::new()
///     .bind("status", "active")
///     .bind_opt("team", None::<i64>)
///     .bind_list("ids", [1_i64, 2, 3])
///     .push(10_i64);
/// assert!(params.contains("status"));
/// assert!(!params.contains("team"));
/// assert_eq!(params.positional().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    named: HashMap<String, Param>,
    positional: Vec<Param>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named value (scalar, `Param::List`, or `Fragment`).
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
        self.insert(name, value);
        self
    }

    /// Bind only when `value` is `Some`, leaving the key absent otherwise.
    #[must_use]
    pub fn bind_opt<T: Into<Param>>(mut self, name: impl Into<String>, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn bind_list<I, T>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RowValues>,
    {
        self.insert(
            name,
            Param::List(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Append the next positional value.
    #[must_use]
    pub fn push(mut self, value: impl Into<Param>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Param>) {
        self.named.insert(name.into(), value.into());
    }

    pub fn push_mut(&mut self, value: impl Into<Param>) {
        self.positional.push(value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.named.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    #[must_use]
    pub fn positional(&self) -> &[Param] {
        &self.positional
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.positional.is_empty()
    }
}

impl<K: Into<String>, V: Into<Param>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}
