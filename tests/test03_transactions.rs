#![cfg(feature = "sqlite")]

use std::time::Duration;

use sqlweave::prelude::*;
use tempfile::TempDir;

mod common;

async fn ledger_db(dir: &TempDir) -> Result<Database, SqlWeaveError> {
    let path = dir.path().join("ledger.db");
    let db = DatabaseConfig::sqlite_builder(path.to_string_lossy())
        .max_connections(1)
        .checkout_timeout(Duration::from_secs(2))
        .build()
        .await?;
    db.execute_batch(
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL CHECK (balance >= 0));
         INSERT INTO accounts (id, balance) VALUES (1, 100), (2, 0);",
    )
    .await?;
    Ok(db)
}

async fn balances(db: &Database) -> Result<Vec<RowValues>, SqlWeaveError> {
    db.query("SELECT balance FROM accounts ORDER BY id")
        .on_primary()
        .column()
        .await
}

async fn transfer(tx: &mut Transaction<'_>, amount: i64) -> Result<usize, SqlWeaveError> {
    tx.query("UPDATE accounts SET balance = balance + :amt WHERE id = 2")
        .bind("amt", amount)
        .execute()
        .await?;
    tx.query("UPDATE accounts SET balance = balance - :amt WHERE id = 1")
        .bind("amt", amount)
        .execute()
        .await
}

#[tokio::test]
async fn commit_makes_all_statements_durable() -> Result<(), SqlWeaveError> {
    common::init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let db = ledger_db(&dir).await?;

    let mut tx = db.begin().await?;
    assert_eq!(tx.state(), TxState::Active);
    transfer(&mut tx, 30).await?;
    let inside = tx
        .query("SELECT balance FROM accounts WHERE id = 2")
        .column()
        .await?;
    assert_eq!(inside, vec![RowValues::Int(30)]);
    tx.commit().await?;

    assert_eq!(balances(&db).await?, vec![RowValues::Int(70), RowValues::Int(30)]);
    Ok(())
}

#[tokio::test]
async fn failing_unit_of_work_leaves_no_partial_writes() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = ledger_db(&dir).await?;

    // the second update violates the CHECK constraint after the first one succeeded
    let result: Result<usize, SqlWeaveError> =
        async { sqlweave::transaction!(db, tx, { transfer(&mut tx, 500).await }) }.await;
    let err = result.expect_err("overdraft must fail");
    assert!(matches!(err, SqlWeaveError::Query { .. }));
    assert!(err.sql().is_some_and(|sql| sql.contains("balance - ?1")));

    assert_eq!(balances(&db).await?, vec![RowValues::Int(100), RowValues::Int(0)]);
    Ok(())
}

#[tokio::test]
async fn macro_commits_on_success() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = ledger_db(&dir).await?;

    let moved = sqlweave::transaction!(db, tx, { transfer(&mut tx, 25).await })?;
    assert_eq!(moved, 1);
    assert_eq!(balances(&db).await?, vec![RowValues::Int(75), RowValues::Int(25)]);
    Ok(())
}

#[tokio::test]
async fn explicit_rollback_discards_work() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = ledger_db(&dir).await?;

    let mut tx = db.begin().await?;
    transfer(&mut tx, 10).await?;
    tx.rollback().await?;

    assert_eq!(balances(&db).await?, vec![RowValues::Int(100), RowValues::Int(0)]);
    Ok(())
}

#[tokio::test]
async fn dropped_transaction_rolls_back_before_reuse() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = ledger_db(&dir).await?;

    {
        let mut tx = db.begin().await?;
        transfer(&mut tx, 40).await?;
        // dropped without commit
    }

    // the single pooled connection comes back only after the spawned rollback
    assert_eq!(balances(&db).await?, vec![RowValues::Int(100), RowValues::Int(0)]);

    let mut tx = db.begin().await?;
    transfer(&mut tx, 5).await?;
    tx.commit().await?;
    assert_eq!(balances(&db).await?, vec![RowValues::Int(95), RowValues::Int(5)]);
    Ok(())
}

#[tokio::test]
async fn savepoints_roll_back_independently() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = ledger_db(&dir).await?;

    let mut tx = db.begin().await?;
    transfer(&mut tx, 10).await?;

    {
        let mut nested = tx.begin().await?;
        assert!(nested.is_nested());
        transfer(&mut nested, 20).await?;
        nested.rollback().await?;
    }
    {
        let mut nested = tx.begin().await?;
        transfer(&mut nested, 1).await?;
        // dropped while active: its rollback runs before the parent's next statement
    }
    {
        let mut nested = tx.begin().await?;
        transfer(&mut nested, 5).await?;
        nested.commit().await?;
    }
    tx.commit().await?;

    assert_eq!(balances(&db).await?, vec![RowValues::Int(85), RowValues::Int(15)]);
    Ok(())
}

#[tokio::test]
async fn released_savepoint_keeps_parent_usable() -> Result<(), SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let db = ledger_db(&dir).await?;

    let mut tx = db.begin().await?;
    {
        let nested = tx.begin().await?;
        nested.commit().await?;
    }
    tx.execute_batch("DELETE FROM accounts WHERE id = 2").await?;
    tx.rollback().await?;

    assert_eq!(balances(&db).await?.len(), 2);
    Ok(())
}
