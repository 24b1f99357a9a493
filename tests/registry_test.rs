//! Integration tests for the instance registry.
//!
//! Tests verify that:
//! - Instances are persisted and rebuilt from the store
//! - Rejected mutations leave both the store and live state unchanged
//! - Removing or replacing an instance disposes its old handle
//! - Entity types are generated eagerly and synthesized on demand
//! - Concurrent pings and rebuilds do not interfere
//! - A held session does not starve other callers on the same instance

use dynaconn::config::{PoolOptions, RegistryOptions};
use dynaconn::models::{FieldValue, Fields, InstanceConfig, Section, fields};
use dynaconn::store;
use dynaconn::{DbError, InstanceRegistry, create_instance_record};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

/// Upper bound for calls that must not wait on a held session.
const NO_STARVATION: Duration = Duration::from_secs(10);

/// Create a SQLite file with a `users` table and one row.
async fn seed_sqlite(path: &Path, extra: &[&str]) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        )
        .await
        .unwrap();
    sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO users (name, age) VALUES ('alice', 30)")
        .execute(&pool)
        .await
        .unwrap();
    for sql in extra {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

fn sqlite_section(path: &Path) -> Section {
    InstanceConfig::sqlite(path.to_str().unwrap()).to_section()
}

struct Fixture {
    dir: TempDir,
    registry: InstanceRegistry,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_pool_options(PoolOptions::default()).await
    }

    async fn with_pool_options(pool_options: PoolOptions) -> Self {
        let dir = TempDir::new().unwrap();
        let options =
            RegistryOptions::new(dir.path().join("source.toml")).with_pool_options(pool_options);
        let registry = InstanceRegistry::open(options).await.unwrap();
        Self { dir, registry }
    }

    fn store_path(&self) -> PathBuf {
        self.dir.path().join("source.toml")
    }

    async fn seeded(&self, file: &str, extra: &[&str]) -> Section {
        let path = self.dir.path().join(file);
        seed_sqlite(&path, extra).await;
        sqlite_section(&path)
    }
}

#[tokio::test]
async fn test_add_then_ping_and_generate() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;

    fx.registry.add_instance("main", &section, false).await.unwrap();

    assert_eq!(fx.registry.list_names().await, vec!["main"]);
    assert!(fx.registry.ping("main").await.unwrap());

    let models = fx.registry.models("main").await.unwrap();
    let users = models.get("users").unwrap();
    assert_eq!(users.type_name(), "Users");
    assert_eq!(users.columns().len(), 3);

    fx.registry.close().await;
}

#[tokio::test]
async fn test_add_existing_without_overwrite_changes_nothing() {
    let fx = Fixture::new().await;
    let first = fx.seeded("first.db", &[]).await;
    let second = fx.seeded("second.db", &[]).await;

    fx.registry.add_instance("main", &first, false).await.unwrap();
    let handle = fx.registry.get_handle("main").await.unwrap();
    let before = std::fs::read_to_string(fx.store_path()).unwrap();

    let err = fx.registry.add_instance("main", &second, false).await.unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists { .. }));

    assert_eq!(std::fs::read_to_string(fx.store_path()).unwrap(), before);
    assert_eq!(fx.registry.config("main").await.unwrap(), first);
    let same = fx.registry.get_handle("main").await.unwrap();
    assert!(Arc::ptr_eq(&handle, &same));
    assert!(!handle.is_closed());

    fx.registry.close().await;
}

#[tokio::test]
async fn test_overwrite_replaces_and_disposes_old_handle() {
    let fx = Fixture::new().await;
    let first = fx.seeded("first.db", &[]).await;
    let second = fx
        .seeded("second.db", &["CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL)"])
        .await;

    fx.registry.add_instance("main", &first, false).await.unwrap();
    let old = fx.registry.get_handle("main").await.unwrap();

    fx.registry.add_instance("main", &second, true).await.unwrap();
    assert!(old.is_closed());
    assert!(fx.registry.ping("main").await.unwrap());

    let models = fx.registry.models("main").await.unwrap();
    assert_eq!(models.table_names().collect::<Vec<_>>(), vec!["orders", "users"]);

    fx.registry.close().await;
}

#[tokio::test]
async fn test_remove_disposes_handle_and_types() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();
    let handle = fx.registry.get_handle("main").await.unwrap();
    let users = fx.registry.get_db_instance("main", "users").await.unwrap();

    fx.registry.remove_instance("main").await.unwrap();

    assert!(fx.registry.list_names().await.is_empty());
    assert!(fx.registry.get_handle("main").await.unwrap_err().is_not_found());
    assert!(fx.registry.models("main").await.unwrap_err().is_not_found());
    let err = handle.read_all(&users).await.unwrap_err();
    assert!(matches!(err, DbError::ClosedHandle { .. }));
    let err = handle.begin().await.unwrap_err();
    assert!(matches!(err, DbError::ClosedHandle { .. }));

    let err = fx.registry.remove_instance("main").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();
    fx.registry.close().await;

    let persisted = store::read(&fx.store_path()).unwrap();
    assert_eq!(persisted.get("main"), Some(&section));

    let reopened = InstanceRegistry::open(RegistryOptions::new(fx.store_path()))
        .await
        .unwrap();
    assert_eq!(reopened.list_names().await, vec!["main"]);
    assert!(reopened.ping("main").await.unwrap());
    assert!(reopened.models("main").await.unwrap().get("users").is_some());
    reopened.close().await;
}

#[tokio::test]
async fn test_update_merges_into_existing() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();

    let mut change = Section::new();
    change.insert("comment".into(), "nightly copy".into());
    fx.registry.update_instance("main", &change).await.unwrap();
    let stored = fx.registry.config("main").await.unwrap();
    assert_eq!(stored.get("comment").map(String::as_str), Some("nightly copy"));
    assert_eq!(stored.get("base"), section.get("base"));

    let err = fx.registry.update_instance("other", &change).await.unwrap_err();
    assert!(err.is_not_found());

    fx.registry.close().await;
}

#[tokio::test]
async fn test_update_is_persisted() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();

    let mut change = Section::new();
    change.insert("comment".into(), "nightly copy".into());
    fx.registry.update_instance("main", &change).await.unwrap();

    let persisted = store::read(&fx.store_path()).unwrap();
    let live = fx.registry.config("main").await.unwrap();
    assert_eq!(persisted.get("main"), Some(&live));
    assert_eq!(live.get("comment").map(String::as_str), Some("nightly copy"));

    fx.registry.close().await;
    let reopened = InstanceRegistry::open(RegistryOptions::new(fx.store_path()))
        .await
        .unwrap();
    assert_eq!(reopened.config("main").await.unwrap(), live);
    reopened.close().await;
}

#[tokio::test]
async fn test_update_rejects_merge_still_missing_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("source.toml");
    let mut incomplete = InstanceConfig::sqlite("").to_section();
    incomplete.remove("port");
    let mut sections = store::Sections::new();
    sections.insert("mem".into(), incomplete.clone());
    store::write_atomic(&path, &sections).unwrap();
    let before = std::fs::read(&path).unwrap();

    let registry = InstanceRegistry::open(RegistryOptions::new(&path)).await.unwrap();
    let mut change = Section::new();
    change.insert("comment".into(), "x".into());
    let err = registry.update_instance("mem", &change).await.unwrap_err();
    match err {
        DbError::Validation { missing, .. } => assert_eq!(missing, vec!["port"]),
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(registry.config("mem").await.unwrap(), incomplete);
    registry.close().await;
}

#[tokio::test]
async fn test_update_repoints_instance() {
    let fx = Fixture::new().await;
    let first = fx.seeded("first.db", &[]).await;
    let second = fx
        .seeded("second.db", &["CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL)"])
        .await;
    fx.registry.add_instance("main", &first, false).await.unwrap();

    let mut change = Section::new();
    change.insert("base".into(), second["base"].clone());
    fx.registry.update_instance("main", &change).await.unwrap();

    let models = fx.registry.models("main").await.unwrap();
    assert!(models.get("orders").is_some());

    fx.registry.close().await;
}

#[tokio::test]
async fn test_get_db_instance_synthesizes_late_tables() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();

    // Created after the instance was built.
    let handle = fx.registry.get_handle("main").await.unwrap();
    handle
        .scoped(|session| {
            Box::pin(async move {
                let stmt = dynaconn::db::Statement {
                    sql: "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)".to_string(),
                    params: Vec::new(),
                };
                session.execute(&stmt).await.map(|_| ())
            })
        })
        .await
        .unwrap();
    assert!(fx.registry.models("main").await.unwrap().get("notes").is_none());

    let first = fx.registry.get_db_instance("main", "notes").await.unwrap();
    let second = fx.registry.get_db_instance("main", "notes").await.unwrap();
    assert_eq!(first.type_name(), "Notes");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(fx.registry.models("main").await.unwrap().get("notes").is_some());

    let cached = fx.registry.get_db_instance("main", "users").await.unwrap();
    assert_eq!(cached.table_name(), "users");

    fx.registry.close().await;
}

#[tokio::test]
async fn test_get_db_instance_unknown_table_or_instance() {
    let fx = Fixture::new().await;
    let section = fx
        .seeded("main.db", &["CREATE VIEW adults AS SELECT * FROM users WHERE age >= 18"])
        .await;
    fx.registry.add_instance("main", &section, false).await.unwrap();

    let err = fx.registry.get_db_instance("main", "missing").await.unwrap_err();
    assert!(err.is_not_found());
    // Views are not base tables.
    let err = fx.registry.get_db_instance("main", "adults").await.unwrap_err();
    assert!(err.is_not_found());
    let err = fx.registry.get_db_instance("other", "users").await.unwrap_err();
    assert!(err.is_not_found());

    fx.registry.close().await;
}

#[tokio::test]
async fn test_create_instance_record_in_caller_session() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();
    let models = fx.registry.models("main").await.unwrap();

    let mut session = fx.registry.new_session("main").await.unwrap();
    let record = create_instance_record(
        &models,
        &mut session,
        "USERS",
        fields([
            ("name", FieldValue::from("bob")),
            ("age", FieldValue::Int(41)),
        ]),
    )
    .await
    .unwrap();
    assert_eq!(record["name"], json!("bob"));
    assert_eq!(record["age"], json!(41));

    create_instance_record(&models, &mut session, "users", fields([("name", "carol")]))
        .await
        .unwrap();

    let err = create_instance_record(&models, &mut session, "users", Fields::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation { .. }));

    let err = create_instance_record(&models, &mut session, "ghosts", fields([("name", "x")]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    session.commit().await.unwrap();

    let users = models.get("users").unwrap();
    let handle = fx.registry.get_handle("main").await.unwrap();
    assert_eq!(handle.read_all(users).await.unwrap().len(), 3);

    fx.registry.close().await;
}

#[tokio::test]
async fn test_get_db_instance_twice_both_usable() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();
    let handle = fx.registry.get_handle("main").await.unwrap();

    let writer = fx.registry.get_db_instance("main", "users").await.unwrap();
    let reader = fx.registry.get_db_instance("main", "users").await.unwrap();

    let created = handle
        .create(&writer, fields([("name", FieldValue::from("dora")), ("age", FieldValue::Int(52))]))
        .await
        .unwrap();
    assert_eq!(created["name"], json!("dora"));

    let rows = handle.read_all(&reader).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|row| row["name"] == json!("dora")));

    fx.registry.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_held_session_does_not_starve_other_calls() {
    let fx = Fixture::with_pool_options(PoolOptions {
        acquire_timeout_secs: Some(2),
        ..Default::default()
    })
    .await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();
    let models = fx.registry.models("main").await.unwrap();

    let mut session = fx.registry.new_session("main").await.unwrap();
    create_instance_record(&models, &mut session, "users", fields([("name", "erin")]))
        .await
        .unwrap();

    let users = timeout(NO_STARVATION, fx.registry.get_db_instance("main", "users"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(users.table_name(), "users");
    assert!(timeout(NO_STARVATION, fx.registry.ping("main")).await.unwrap().unwrap());

    session.commit().await.unwrap();
    let handle = fx.registry.get_handle("main").await.unwrap();
    assert_eq!(handle.read_all(&users).await.unwrap().len(), 2);

    fx.registry.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_completes_while_session_held() {
    let fx = Fixture::with_pool_options(PoolOptions {
        acquire_timeout_secs: Some(1),
        ..Default::default()
    })
    .await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();
    let handle = fx.registry.get_handle("main").await.unwrap();

    let session = fx.registry.new_session("main").await.unwrap();
    timeout(NO_STARVATION, fx.registry.remove_instance("main"))
        .await
        .unwrap()
        .unwrap();

    assert!(fx.registry.list_names().await.is_empty());
    assert!(handle.is_closed());
    drop(session);
}

#[tokio::test]
async fn test_open_skips_broken_instance() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("source.toml");
    let mut sections = store::Sections::new();
    sections.insert("mem".into(), InstanceConfig::sqlite("").to_section());
    sections.insert(
        "bogus".into(),
        InstanceConfig::network("oracle", "u", "p", "h", "1", "d").to_section(),
    );
    store::write_atomic(&path, &sections).unwrap();

    let registry = InstanceRegistry::open(RegistryOptions::new(&path)).await.unwrap();
    assert_eq!(registry.list_names().await, vec!["bogus", "mem"]);
    assert!(registry.ping("mem").await.unwrap());
    assert!(registry.get_handle("bogus").await.unwrap_err().is_not_found());
    registry.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ping_and_rebuild() {
    let fx = Fixture::new().await;
    let section = fx.seeded("main.db", &[]).await;
    fx.registry.add_instance("main", &section, false).await.unwrap();
    let Fixture { dir, registry } = fx;
    let registry = Arc::new(registry);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                // A ping may land on a handle that is being replaced.
                let _ = registry.ping("main").await.unwrap();
            }
        }));
    }
    for _ in 0..3 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.rebuild_one("main").await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(registry.ping("main").await.unwrap());
    assert!(registry.models("main").await.unwrap().get("users").is_some());
    registry.close().await;
    drop(dir);
}
