#![cfg(feature = "sqlite")]

use sqlweave::binding::{BindOptions, PlaceholderStyle, bind};
use sqlweave::error::BindingErrorKind;
use sqlweave::prelude::*;
use tempfile::TempDir;

mod common;

async fn people_db(dir: &TempDir) -> Result<Database, SqlWeaveError> {
    let path = dir.path().join("people.db");
    let db = DatabaseConfig::sqlite_builder(path.to_string_lossy())
        .max_connections(2)
        .build()
        .await?;
    db.execute_batch(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, team TEXT, age INTEGER);
         INSERT INTO people (id, name, team, age) VALUES
            (1, 'ada', 'core', 36),
            (2, 'bob', 'core', 41),
            (3, 'cy', 'ops', 29),
            (4, 'di', NULL, 52);",
    )
    .await?;
    Ok(db)
}

fn names(values: &[RowValues]) -> Vec<&str> {
    values.iter().filter_map(RowValues::as_text).collect()
}

#[tokio::test]
async fn optional_block_follows_its_parameter() -> Result<(), SqlWeaveError> {
    common::init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let db = people_db(&dir).await?;
    let sql = "SELECT name FROM people WHERE 1 = 1 { AND team = :team } ORDER BY id";

    let everyone = db.query(sql).column().await?;
    assert_eq!(names(&everyone), vec!["ada", "bob", "cy", "di"]);

    let core = db.query(sql).bind("team", "core").column().await?;
    assert_eq!(names(&core), vec!["ada", "bob"]);

    // an explicit NULL still counts as bound, so the block stays
    let null_team = db.query(sql).bind("team", RowValues::Null).column().await?;
    assert!(null_team.is_empty());
    Ok(())
}

#[tokio::test]
async fn nested_blocks_may_share_braces() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = people_db(&dir).await?;
    let sql = "SELECT name FROM people WHERE 1 = 1 { AND team = :team { AND age > :age}} ORDER BY id";

    let core = db.query(sql).bind("team", "core").column().await?;
    assert_eq!(names(&core), vec!["ada", "bob"]);

    let older_core = db
        .query(sql)
        .bind("team", "core")
        .bind("age", 40)
        .column()
        .await?;
    assert_eq!(names(&older_core), vec!["bob"]);

    // the inner block is dropped with its parent
    let everyone = db.query(sql).bind("age", 40).column().await?;
    assert_eq!(everyone.len(), 4);

    let escaped = db
        .query(r"SELECT '\{' AS quoted, json_array(:v) AS j -- \{:x\}")
        .bind("v", 1)
        .bound()?;
    assert_eq!(escaped.query, r"SELECT '\{' AS quoted, json_array(?1) AS j -- \{:x\}");

    let literal = db.query(r"SELECT 'x' WHERE 1 = 1 \{ :v \}").bind("v", 1).bound()?;
    assert_eq!(literal.query, "SELECT 'x' WHERE 1 = 1 { ?1 }");
    Ok(())
}

#[tokio::test]
async fn missing_key_outside_blocks_fails_before_running() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = people_db(&dir).await?;

    let err = db
        .query("SELECT name FROM people WHERE id = :id")
        .all()
        .await
        .expect_err("unbound key must fail");
    match err {
        SqlWeaveError::Binding { kind, template, .. } => {
            assert_eq!(kind, BindingErrorKind::Missing);
            assert!(template.contains(":id"));
        }
        other => panic!("expected binding error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn list_expands_to_one_marker_per_element() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = people_db(&dir).await?;
    let sql = "SELECT name FROM people WHERE id IN (:ids) ORDER BY id";

    let builder = db.query(sql).bind_list("ids", [1_i64, 3, 4]);
    let bound = builder.bound()?;
    assert_eq!(bound.query, "SELECT name FROM people WHERE id IN (?1, ?2, ?3) ORDER BY id");
    assert_eq!(bound.params.len(), 3);

    let picked = builder.column().await?;
    assert_eq!(names(&picked), vec!["ada", "cy", "di"]);

    let err = db
        .query(sql)
        .bind_list("ids", Vec::<i64>::new())
        .all()
        .await
        .expect_err("empty list is rejected by default");
    assert!(matches!(err, SqlWeaveError::InvalidParameter { .. }));
    Ok(())
}

#[tokio::test]
async fn clause_fragments_only_come_from_the_whitelist() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = people_db(&dir).await?;
    let clauses = ClauseBuilder::new([("age", "age"), ("name", "lower(name)")]);

    let order = clauses.order_by([("age", "desc")])?;
    let by_age = db
        .query("SELECT name FROM people ORDER BY :order")
        .bind_fragment("order", order)
        .column()
        .await?;
    assert_eq!(names(&by_age), vec!["di", "bob", "ada", "cy"]);

    let err = clauses
        .order_by([("age; DROP TABLE people", "asc")])
        .expect_err("unknown key");
    assert!(matches!(err, SqlWeaveError::Clause(_)));
    let err = clauses.order_by([("age", "sideways")]).expect_err("bad direction");
    assert!(matches!(err, SqlWeaveError::Clause(_)));
    Ok(())
}

#[tokio::test]
async fn positional_values_and_type_tags() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = people_db(&dir).await?;

    let older_core = db
        .query("SELECT name FROM people WHERE age > ?!i AND team = ? ORDER BY id")
        .push("40")
        .push("core")
        .column()
        .await?;
    assert_eq!(names(&older_core), vec!["bob"]);

    let err = db
        .query("SELECT name FROM people WHERE age > ?")
        .push(30)
        .push(40)
        .all()
        .await
        .expect_err("surplus positional value");
    assert!(matches!(
        err,
        SqlWeaveError::Binding {
            kind: BindingErrorKind::Surplus,
            ..
        }
    ));

    let err = db
        .query("SELECT name FROM people WHERE age > :age!i")
        .bind("age", "forty")
        .all()
        .await
        .expect_err("cast failure");
    assert!(matches!(
        err,
        SqlWeaveError::Binding {
            kind: BindingErrorKind::Cast(_),
            ..
        }
    ));
    Ok(())
}

#[test]
fn binding_is_stable_across_cache_hits() -> Result<(), SqlWeaveError> {
    let sql = "SELECT * FROM t WHERE a = :a { AND b IN (:b) } { AND c = :c }";
    let params = Params::new().bind("a", 1).bind_list("b", ["x", "y"]);
    let options = BindOptions::new(PlaceholderStyle::Postgres);

    let first = bind(sql, &params, &options)?;
    let second = bind(sql, &params, &options)?;
    assert_eq!(first, second);
    assert_eq!(first.query, "SELECT * FROM t WHERE a = $1  AND b IN ($2, $3)  ");
    assert!(!first.query.contains(':'));
    assert!(!first.query.contains('{'));
    Ok(())
}
