use std::fmt::Write as _;

use serde::Deserialize;

/// Native bind-marker syntax of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaceholderStyle {
    /// `$1, $2, ...`
    #[default]
    Postgres,
    /// `?1, ?2, ...`
    Sqlite,
    /// bare `?`
    Question,
    /// `@p1, @p2, ...`
    Mssql,
}

impl PlaceholderStyle {
    /// Append the marker for the 1-based parameter `number`.
    pub fn write_marker(self, out: &mut String, number: usize) {
        // Writing into a String cannot fail.
        let _ = match self {
            PlaceholderStyle::Postgres => write!(out, "${number}"),
            PlaceholderStyle::Sqlite => write!(out, "?{number}"),
            PlaceholderStyle::Question => {
                out.push('?');
                Ok(())
            }
            PlaceholderStyle::Mssql => write!(out, "@p{number}"),
        };
    }

    #[must_use]
    pub fn marker(self, number: usize) -> String {
        let mut out = String::new();
        self.write_marker(&mut out, number);
        out
    }
}

/// What an empty `Param::List` resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyListPolicy {
    /// Reject with `InvalidParameter`.
    #[default]
    Reject,
    /// Emit `NULL` so `x IN (NULL)` matches nothing.
    AlwaysFalse,
}

/// Knobs for one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindOptions {
    pub style: PlaceholderStyle,
    pub empty_list: EmptyListPolicy,
}

impl BindOptions {
    #[must_use]
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            empty_list: EmptyListPolicy::default(),
        }
    }

    #[must_use]
    pub fn empty_list(mut self, policy: EmptyListPolicy) -> Self {
        self.empty_list = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_per_style() {
        assert_eq!(PlaceholderStyle::Postgres.marker(3), "$3");
        assert_eq!(PlaceholderStyle::Sqlite.marker(3), "?3");
        assert_eq!(PlaceholderStyle::Question.marker(3), "?");
        assert_eq!(PlaceholderStyle::Mssql.marker(3), "@p3");
    }
}
