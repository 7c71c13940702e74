//! Parameter binding: prune optional blocks, then rewrite placeholders into native markers.
//!
//! ```rust
//! use sqlweave::binding::{bind, BindOptions, PlaceholderStyle};
//! use sqlweave::prelude::*;
//!
//! let sql = "select * from users where org = :org { and team = :team } and id in (:ids)";
//! let params = Params::new().bind("org", 7).bind_list("ids", [1_i64, 2, 3]);
//! let bound = bind(sql, &params, &BindOptions::new(PlaceholderStyle::Postgres))?;
//! assert_eq!(bound.query, "select * from users where org = $1  and id in ($2, $3, $4)");
//! assert_eq!(bound.params.len(), 4);
//! # Ok::<(), SqlWeaveError>(())
//! ```

use crate::error::SqlWeaveError;
use crate::template::Template;
use crate::types::RowValues;

mod cast;
pub mod evaluate;
mod params;
pub mod resolve;
mod style;

pub use evaluate::{Evaluation, Segment, evaluate};
pub use params::{Param, Params};
pub use resolve::resolve;
pub use style::{BindOptions, EmptyListPolicy, PlaceholderStyle};

/// SQL text in the driver's native marker syntax plus its ordered values.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAndParams {
    /// The SQL query string
    pub query: String,
    /// The parameters to be bound to the query
    pub params: Vec<RowValues>,
}

impl QueryAndParams {
    pub fn new(query: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }

    /// Create a new `QueryAndParams` with no parameters
    pub fn new_without_params(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: Vec::new(),
        }
    }
}

/// Compile (through the cache), evaluate, and resolve in one step.
///
/// # Errors
/// Any `TemplateSyntax`, `Binding` or `InvalidParameter` error from the three stages.
pub fn bind(
    text: &str,
    params: &Params,
    options: &BindOptions,
) -> Result<QueryAndParams, SqlWeaveError> {
    let template = Template::compile(text)?;
    bind_template(&template, params, options)
}

/// Evaluate and resolve an already compiled template.
///
/// # Errors
/// Any `Binding` or `InvalidParameter` error from resolution.
pub fn bind_template(
    template: &Template,
    params: &Params,
    options: &BindOptions,
) -> Result<QueryAndParams, SqlWeaveError> {
    let evaluation = evaluate(template, params);
    resolve(template, &evaluation, params, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::ClauseBuilder;
    use crate::error::{BindingContext, BindingErrorKind};

    fn pg() -> BindOptions {
        BindOptions::new(PlaceholderStyle::Postgres)
    }

    fn marker_count(query: &str) -> usize {
        query.matches('$').count()
    }

    #[test]
    fn output_has_no_template_syntax_and_matching_params() {
        let sql = "select * from t where a = :a { and b = :b } { and c = :c!i } and d = ?";
        let params = Params::new().bind("a", "x").bind("c", "12").push(true);
        let bound = bind(sql, &params, &pg()).unwrap();

        assert_eq!(
            bound.query,
            "select * from t where a = $1   and c = $2  and d = $3"
        );
        assert!(!bound.query.contains(['{', '}', ':', '?']));
        assert_eq!(marker_count(&bound.query), bound.params.len());
        assert_eq!(
            bound.params,
            vec![
                RowValues::Text("x".into()),
                RowValues::Int(12),
                RowValues::Bool(true)
            ]
        );
    }

    #[test]
    fn missing_key_outside_blocks_is_a_binding_error() {
        let sql = "select * from users where status = :status { and team = :team }";
        let err = bind(sql, &Params::new().bind("team", 1), &pg()).unwrap_err();
        match err {
            SqlWeaveError::Binding {
                template,
                context,
                kind,
            } => {
                assert_eq!(template, sql);
                assert_eq!(context, BindingContext::Named("status".into()));
                assert_eq!(kind, BindingErrorKind::Missing);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn only_status_bound_drops_team_filter() {
        let sql = "select * from users where status = :status { and team = :team }";
        let bound = bind(sql, &Params::new().bind("status", "active"), &pg()).unwrap();
        assert_eq!(bound.query, "select * from users where status = $1 ");
        assert_eq!(bound.params, vec![RowValues::Text("active".into())]);
    }

    #[test]
    fn list_expands_to_one_marker_per_element() {
        let sql = "select * from t where id in (:ids)";
        let params = Params::new().bind_list("ids", [5_i64, 6, 7]);
        let bound = bind(sql, &params, &pg()).unwrap();
        assert_eq!(bound.query, "select * from t where id in ($1, $2, $3)");
        assert_eq!(
            bound.params,
            vec![RowValues::Int(5), RowValues::Int(6), RowValues::Int(7)]
        );
    }

    #[test]
    fn scalar_tag_casts_each_list_element() {
        let params = Params::new().bind_list("ids", ["1", "2"]);
        let bound = bind("in (:ids!i)", &params, &pg()).unwrap();
        assert_eq!(bound.params, vec![RowValues::Int(1), RowValues::Int(2)]);
    }

    #[test]
    fn empty_list_policy() {
        let params = Params::new().bind_list("ids", Vec::<i64>::new());
        let err = bind("x in (:ids)", &params, &pg()).unwrap_err();
        assert!(matches!(err, SqlWeaveError::InvalidParameter { .. }));

        let options = pg().empty_list(EmptyListPolicy::AlwaysFalse);
        let bound = bind("x in (:ids)", &params, &options).unwrap();
        assert_eq!(bound.query, "x in (NULL)");
        assert!(bound.params.is_empty());
    }

    #[test]
    fn positional_count_must_match() {
        let err = bind("? and ?", &Params::new().push(1), &pg()).unwrap_err();
        assert!(matches!(
            err,
            SqlWeaveError::Binding {
                context: BindingContext::Positional(1),
                kind: BindingErrorKind::Shortfall,
                ..
            }
        ));

        let err = bind("?", &Params::new().push(1).push(2), &pg()).unwrap_err();
        assert!(matches!(
            err,
            SqlWeaveError::Binding {
                context: BindingContext::Count {
                    consumed: 1,
                    supplied: 2
                },
                kind: BindingErrorKind::Surplus,
                ..
            }
        ));
    }

    #[test]
    fn positional_inside_elided_block_is_not_consumed() {
        let sql = "a = ? { and b = :b and c = ? } and d = ?";
        let bound = bind(sql, &Params::new().push(1).push(2), &pg()).unwrap();
        assert_eq!(bound.query, "a = $1  and d = $2");
        assert_eq!(bound.params, vec![RowValues::Int(1), RowValues::Int(2)]);
    }

    #[test]
    fn list_tag_requires_a_list() {
        let err = bind(":ids!l", &Params::new().bind("ids", 1), &pg()).unwrap_err();
        assert!(matches!(
            err,
            SqlWeaveError::Binding {
                kind: BindingErrorKind::Cast(_),
                ..
            }
        ));
    }

    #[test]
    fn fragments_splice_as_text() {
        let clauses = ClauseBuilder::new([("name", "u.name"), ("age", "u.age")]);
        let order = clauses.order_by([("name", "desc")]).unwrap();
        let params = Params::new().bind("order", order.clone()).bind("org", 3);
        let bound = bind(
            "select * from users u where org = :org order by :order",
            &params,
            &pg(),
        )
        .unwrap();
        assert_eq!(
            bound.query,
            "select * from users u where org = $1 order by u.name DESC"
        );
        assert_eq!(bound.params.len(), 1);

        let err = bind(":order!s", &Params::new().bind("order", order), &pg()).unwrap_err();
        assert!(matches!(err, SqlWeaveError::InvalidParameter { .. }));
    }

    #[test]
    fn sqlite_and_question_styles() {
        let params = Params::new().bind("a", 1).push(2);
        let sqlite = bind(":a, ?", &params, &BindOptions::new(PlaceholderStyle::Sqlite)).unwrap();
        assert_eq!(sqlite.query, "?1, ?2");
        let question =
            bind(":a, ?", &params, &BindOptions::new(PlaceholderStyle::Question)).unwrap();
        assert_eq!(question.query, "?, ?");
    }

    #[test]
    fn named_key_may_repeat() {
        let bound = bind("a = :x or b = :x", &Params::new().bind("x", 9), &pg()).unwrap();
        assert_eq!(bound.query, "a = $1 or b = $2");
        assert_eq!(bound.params, vec![RowValues::Int(9), RowValues::Int(9)]);
    }

    #[test]
    fn cache_hit_binds_like_cold_compile() {
        let sql = "select :a { , :b }";
        let params = Params::new().bind("a", 1).bind("b", 2);
        let cold = Template::compile_uncached(sql).unwrap();
        let expected = bind_template(&cold, &params, &pg()).unwrap();
        let first = bind(sql, &params, &pg()).unwrap();
        let second = bind(sql, &params, &pg()).unwrap();
        assert_eq!(first, expected);
        assert_eq!(second, expected);
    }
}
