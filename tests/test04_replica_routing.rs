#![cfg(feature = "sqlite")]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlweave::driver::{Driver, DriverConnection, SqliteDriver};
use sqlweave::prelude::*;
use sqlweave::{ResultSet, pool::Target};
use tempfile::TempDir;

mod common;

/// Targets currently "unreachable" for the flaky driver.
#[derive(Debug, Default, Clone)]
struct Outages(Arc<Mutex<HashSet<String>>>);

impl Outages {
    fn fail(&self, target: &str) {
        self.0.lock().expect("outages lock").insert(target.to_string());
    }

    fn heal(&self, target: &str) {
        self.0.lock().expect("outages lock").remove(target);
    }

    fn is_down(&self, target: &str) -> bool {
        self.0.lock().expect("outages lock").contains(target)
    }
}

/// SQLite driver that reports connection failures for targets listed in `outages`.
#[derive(Debug)]
struct FlakyDriver {
    inner: SqliteDriver,
    outages: Outages,
}

#[async_trait]
impl Driver for FlakyDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn connect(&self, target: &str) -> Result<Box<dyn DriverConnection>, SqlWeaveError> {
        let inner = self.inner.connect(target).await?;
        Ok(Box::new(FlakyConnection {
            inner,
            target: target.to_string(),
            outages: self.outages.clone(),
        }))
    }
}

struct FlakyConnection {
    inner: Box<dyn DriverConnection>,
    target: String,
    outages: Outages,
}

impl FlakyConnection {
    fn check(&self) -> Result<(), SqlWeaveError> {
        if self.outages.is_down(&self.target) {
            return Err(SqlWeaveError::Connection {
                sql: String::new(),
                message: format!("{} is unreachable", self.target),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DriverConnection for FlakyConnection {
    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlWeaveError> {
        self.check()?;
        self.inner.execute_batch(sql).await
    }

    async fn execute_select(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlWeaveError> {
        self.check()?;
        self.inner.execute_select(query, params).await
    }

    async fn execute_dml(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlWeaveError> {
        self.check()?;
        self.inner.execute_dml(query, params).await
    }

    async fn ping(&mut self) -> Result<(), SqlWeaveError> {
        self.check()?;
        self.inner.ping().await
    }
}

struct Cluster {
    _dir: TempDir,
    primary: String,
    replicas: Vec<String>,
}

/// A primary and two replicas, each a separate file whose `origin` table names it.
async fn cluster() -> Result<Cluster, SqlWeaveError> {
    let dir = TempDir::new().expect("tempdir");
    let path = |name: &str| dir.path().join(format!("{name}.db")).to_string_lossy().into_owned();
    let primary = path("primary");
    let replicas = vec![path("replica0"), path("replica1")];

    seed(&primary, "primary").await?;
    for (idx, replica) in replicas.iter().enumerate() {
        seed(replica, &format!("replica{idx}")).await?;
    }
    Ok(Cluster {
        _dir: dir,
        primary,
        replicas,
    })
}

async fn seed(path: &str, name: &str) -> Result<(), SqlWeaveError> {
    assert!(!Path::new(path).exists());
    let db = Database::connect(DatabaseConfig::new(DriverKind::Sqlite, path)).await?;
    db.execute_batch("CREATE TABLE origin (name TEXT NOT NULL)").await?;
    db.query("INSERT INTO origin (name) VALUES (:name)")
        .bind("name", name)
        .execute()
        .await?;
    db.close();
    Ok(())
}

async fn origin(db: &Database) -> Result<String, SqlWeaveError> {
    let values = db.query("SELECT name FROM origin LIMIT 1").column().await?;
    Ok(values
        .first()
        .and_then(RowValues::as_text)
        .unwrap_or_default()
        .to_string())
}

async fn flaky_db(
    cluster: &Cluster,
    outages: &Outages,
    configure: impl FnOnce(DatabaseConfigBuilder) -> DatabaseConfigBuilder,
) -> Result<Database, SqlWeaveError> {
    let builder = DatabaseConfig::sqlite_builder(cluster.primary.as_str())
        .replicas(cluster.replicas.iter().cloned())
        .max_connections(2);
    let driver = Arc::new(FlakyDriver {
        inner: SqliteDriver::default(),
        outages: outages.clone(),
    });
    Database::with_driver(configure(builder).finish(), driver).await
}

#[tokio::test]
async fn reads_rotate_over_replicas_and_writes_hit_the_primary() -> Result<(), SqlWeaveError> {
    common::init_tracing();
    let cluster = cluster().await?;
    let db = DatabaseConfig::sqlite_builder(cluster.primary.as_str())
        .replicas(cluster.replicas.iter().cloned())
        .build()
        .await?;

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(origin(&db).await?);
    }
    assert_eq!(seen, ["replica0", "replica1", "replica0", "replica1"]);

    db.query("UPDATE origin SET name = 'primary-updated'")
        .execute()
        .await?;
    let on_primary = db
        .query("SELECT name FROM origin")
        .on_primary()
        .column()
        .await?;
    assert_eq!(on_primary, vec![RowValues::Text("primary-updated".into())]);

    // a locking read is classified as a write
    let locked = db
        .query("SELECT name FROM origin WHERE name <> 'for update'")
        .intent(Intent::detect("select name from origin for update"))
        .column()
        .await?;
    assert_eq!(locked, vec![RowValues::Text("primary-updated".into())]);
    Ok(())
}

#[tokio::test]
async fn transactions_read_from_the_primary() -> Result<(), SqlWeaveError> {
    let cluster = cluster().await?;
    let db = DatabaseConfig::sqlite_builder(cluster.primary.as_str())
        .replicas(cluster.replicas.iter().cloned())
        .build()
        .await?;

    let mut tx = db.begin().await?;
    let inside = tx.query("SELECT name FROM origin").column().await?;
    assert_eq!(inside, vec![RowValues::Text("primary".into())]);
    tx.commit().await?;

    let replica = db.checkout(Role::Replica).await?;
    assert_eq!(replica.role(), Role::Replica);
    Ok(())
}

#[tokio::test]
async fn broken_replica_is_skipped_and_the_read_retried() -> Result<(), SqlWeaveError> {
    let cluster = cluster().await?;
    let outages = Outages::default();
    let db = flaky_db(&cluster, &outages, |b| {
        b.replica_cooldown(Duration::from_secs(60))
    })
    .await?;

    outages.fail(&cluster.replicas[0]);
    // round robin starts at replica0, which fails; the retry lands on replica1
    assert_eq!(origin(&db).await?, "replica1");
    // replica0 stays out of rotation during its cooldown
    for _ in 0..3 {
        assert_eq!(origin(&db).await?, "replica1");
    }
    Ok(())
}

#[tokio::test]
async fn read_retry_can_be_disabled() -> Result<(), SqlWeaveError> {
    let cluster = cluster().await?;
    let outages = Outages::default();
    let db = flaky_db(&cluster, &outages, |b| b.read_retry(ReadRetry::Never)).await?;

    outages.fail(&cluster.replicas[0]);
    let err = origin(&db).await.expect_err("no retry configured");
    assert!(err.is_connection_error());
    assert_eq!(err.sql(), Some("SELECT name FROM origin LIMIT 1"));

    // the failure still took replica0 out of rotation
    assert_eq!(origin(&db).await?, "replica1");
    Ok(())
}

#[tokio::test]
async fn unreachable_replicas_fall_back_to_primary_then_recover() -> Result<(), SqlWeaveError> {
    let cluster = cluster().await?;
    let outages = Outages::default();
    for replica in &cluster.replicas {
        outages.fail(replica);
    }
    // both replicas fail their startup check
    let db = flaky_db(&cluster, &outages, |b| {
        b.replica_cooldown(Duration::from_millis(100))
    })
    .await?;

    assert_eq!(origin(&db).await?, "primary");
    assert_eq!(origin(&db).await?, "primary");

    for replica in &cluster.replicas {
        outages.heal(replica);
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut seen = HashSet::new();
    for _ in 0..4 {
        seen.insert(origin(&db).await?);
    }
    assert!(seen.contains("replica0") || seen.contains("replica1"));
    assert!(!seen.contains("primary"));
    Ok(())
}

#[tokio::test]
async fn primary_outage_at_startup_is_fatal() -> Result<(), SqlWeaveError> {
    let cluster = cluster().await?;
    let outages = Outages::default();
    outages.fail(&cluster.primary);

    let err = flaky_db(&cluster, &outages, |b| b)
        .await
        .expect_err("primary must answer its startup check");
    assert!(err.is_connection_error());
    Ok(())
}

#[test]
fn route_is_pure() {
    use sqlweave::pool::{ReplicaView, RouteInput, route};

    let replicas = [
        ReplicaView {
            healthy: false,
            last_used: None,
        },
        ReplicaView {
            healthy: true,
            last_used: None,
        },
    ];
    let input = RouteInput {
        intent: Intent::Read,
        in_transaction: false,
        replicas: &replicas,
        cursor: 0,
        policy: ReplicaPolicy::RoundRobin,
    };
    assert_eq!(route(&input), Target::Replica(1));
    assert_eq!(route(&input), route(&input));
}
