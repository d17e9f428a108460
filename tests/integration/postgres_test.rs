//! PostgreSQL store integration tests.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

use querygate::db::PoolSettings;
use querygate::engine::{ExecutionEngine, ExecutionResult};
use querygate::error::{GateError, StoreErrorCategory};
use querygate::registry::{Environment, EnvironmentRegistry};
use serde_json::json;
use std::sync::Arc;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

fn get_test_environment() -> Option<Environment> {
    let url = get_test_database_url()?;
    Environment::connect("pg", &url, PoolSettings::default()).ok()
}

fn get_test_engine() -> Option<ExecutionEngine> {
    let env = get_test_environment()?;
    let registry = EnvironmentRegistry::new(vec![env], "pg").ok()?;
    Some(ExecutionEngine::new(Arc::new(registry)))
}

#[tokio::test]
async fn test_select_generated_rows() {
    let Some(engine) = get_test_engine() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = engine
        .run_query(
            None,
            "SELECT g AS n, 'row ' || g AS label FROM generate_series(1, 10) g LIMIT 5",
            Some(3),
        )
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(outcome.rows.columns, vec!["n", "label"]);
    assert_eq!(outcome.rows.returned_count, 3);
    assert_eq!(outcome.rows.total_available, 5);
    assert_eq!(outcome.rows.rows[0]["n"], json!(1));
    assert_eq!(outcome.rows.rows[0]["label"], json!("row 1"));

    engine.registry().close().await;
}

#[tokio::test]
async fn test_numeric_columns_are_numbers() {
    let Some(engine) = get_test_engine() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = engine
        .run_query(None, "SELECT 1.50::numeric AS n LIMIT 1", None)
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(outcome.rows.rows[0]["n"], json!(1.5));

    let result = engine
        .run_query(None, "SELECT 1.50::numeric AS n WHERE false LIMIT 1", None)
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(outcome.rows.columns, vec!["n"]);
    assert_eq!(outcome.rows.returned_count, 0);

    engine.registry().close().await;
}

#[tokio::test]
async fn test_session_rejects_writes() {
    let Some(env) = get_test_environment() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut lease = env.pool().acquire().await.unwrap();
    let result = lease
        .fetch_all("CREATE TEMP TABLE querygate_write_check (id int)")
        .await;
    assert!(result.is_err(), "write succeeded in a read-only session");
    drop(lease);

    env.pool().close().await;
}

#[tokio::test]
async fn test_missing_relation_is_classified() {
    let Some(engine) = get_test_engine() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = engine
        .run_query(None, "SELECT * FROM querygate_no_such_table LIMIT 1", None)
        .await;
    match result {
        ExecutionResult::Error(GateError::Store(err)) => {
            assert_eq!(err.category, StoreErrorCategory::MissingRelation);
            assert_eq!(err.code.as_deref(), Some("42P01"));
        }
        other => panic!("Expected store error, got {other:?}"),
    }

    engine.registry().close().await;
}
