//! SQLite store integration tests.
//!
//! Each test seeds a temporary database file through a writable pool, then
//! runs everything else through the gateway's read-only environment.

use querygate::db::PoolSettings;
use querygate::engine::{ExecutionEngine, ExecutionResult};
use querygate::error::{GateError, StoreErrorCategory};
use querygate::registry::{Environment, EnvironmentRegistry};
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Creates `users` with ten rows and returns the directory guard and URL.
async fn seeded_database() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, age INTEGER, score REAL, note TEXT)",
    )
    .execute(&pool)
    .await
    .unwrap();

    for id in 1..=10i64 {
        let note = if id % 2 == 0 { None } else { Some("odd") };
        sqlx::query("INSERT INTO users (id, email, age, score, note) VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(format!("user{id}@example.com"))
            .bind(20 + id)
            .bind(id as f64 * 1.5)
            .bind(note)
            .execute(&pool)
            .await
            .unwrap();
    }
    pool.close().await;

    let url = format!("sqlite://{}", path.display());
    (dir, url)
}

fn settings() -> PoolSettings {
    PoolSettings {
        max_connections: 2,
        acquire_timeout: Duration::from_secs(2),
    }
}

fn engine_for(url: &str) -> ExecutionEngine {
    let env = Environment::connect("local", url, settings()).unwrap();
    let registry = EnvironmentRegistry::new(vec![env], "local").unwrap();
    ExecutionEngine::new(Arc::new(registry))
}

#[tokio::test]
async fn test_cap_below_statement_limit() {
    let (_dir, url) = seeded_database().await;
    let engine = engine_for(&url);

    let result = engine
        .run_query(None, "SELECT * FROM users ORDER BY id LIMIT 5", Some(3))
        .await;

    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(outcome.environment, "local");
    assert_eq!(outcome.rows.returned_count, 3);
    assert_eq!(outcome.rows.total_available, 5);
    assert!(outcome.rows.truncated);
    assert_eq!(
        outcome.rows.truncation_notice().as_deref(),
        Some("Result truncated: showing 3 of 5 rows")
    );
    assert_eq!(
        outcome.rows.columns,
        vec!["id", "email", "age", "score", "note"]
    );
}

#[tokio::test]
async fn test_values_keep_storage_types() {
    let (_dir, url) = seeded_database().await;
    let engine = engine_for(&url);

    let result = engine
        .run_query(None, "SELECT id, score, note FROM users ORDER BY id LIMIT 2", None)
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };

    let first = &outcome.rows.rows[0];
    assert_eq!(first["id"], json!(1));
    assert_eq!(first["score"], json!(1.5));
    assert_eq!(first["note"], json!("odd"));

    let second = &outcome.rows.rows[1];
    assert_eq!(second["note"], Value::Null);
    assert!(!outcome.rows.truncated);
}

#[tokio::test]
async fn test_missing_table_is_classified() {
    let (_dir, url) = seeded_database().await;
    let engine = engine_for(&url);

    let result = engine
        .run_query(None, "SELECT * FROM orders LIMIT 5", None)
        .await;

    match result {
        ExecutionResult::Error(GateError::Store(err)) => {
            assert_eq!(err.category, StoreErrorCategory::MissingRelation);
            assert!(err.message.contains("no such table"));
        }
        other => panic!("Expected store error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_is_read_only_below_the_guard() {
    let (_dir, url) = seeded_database().await;
    let env = Environment::connect("local", &url, settings()).unwrap();

    {
        let mut lease = env.pool().acquire().await.unwrap();
        let write = lease.fetch_all("DELETE FROM users").await;
        assert!(write.is_err(), "write succeeded on a read-only connection");
    }

    let mut lease = env.pool().acquire().await.unwrap();
    let fetched = lease
        .fetch_all("SELECT COUNT(*) AS n FROM users")
        .await
        .unwrap();
    assert_eq!(fetched.records[0]["n"], json!(10));
}

#[tokio::test]
async fn test_analysis_over_fetched_rows() {
    let (_dir, url) = seeded_database().await;
    let engine = engine_for(&url);

    let result = engine
        .run_analysis(
            None,
            "SELECT * FROM users ORDER BY id LIMIT 10",
            "data.filter(r => r.age > 25).length",
            None,
        )
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(outcome.result, json!(5));
    assert_eq!(outcome.returned_count, 10);
    assert!(outcome.evaluation_error().is_none());

    let result = engine
        .run_analysis(
            None,
            "SELECT email FROM users ORDER BY id LIMIT 10",
            "data.map(r => r.email).slice(0, 2)",
            None,
        )
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(
        outcome.result,
        json!(["user1@example.com", "user2@example.com"])
    );
}

#[tokio::test]
async fn test_probe_reports_healthy() {
    let (_dir, url) = seeded_database().await;
    let engine = engine_for(&url);

    let report = engine.registry().probe("local").await.unwrap();
    assert!(report.healthy, "probe failed: {:?}", report.error);
    assert_eq!(engine.registry().current(), "local");
}

#[tokio::test]
async fn test_probe_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("absent.db").display());
    let engine = engine_for(&url);

    let report = engine.registry().probe("local").await.unwrap();
    assert!(!report.healthy);
    assert!(report.error.is_some());
}
