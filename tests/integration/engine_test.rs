//! End-to-end engine tests over mock environments.

use querygate::db::MockStore;
use querygate::engine::{ExecutionEngine, ExecutionResult};
use querygate::error::GateError;
use querygate::guard::RejectReason;
use querygate::registry::{Environment, EnvironmentRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    engine: Arc<ExecutionEngine>,
    dev: Arc<MockStore>,
    prod: Arc<MockStore>,
}

/// `dev` (default) holds 10 users, `prod` holds 40.
fn fixture(dwell: Duration) -> Fixture {
    let dev = Arc::new(MockStore::new("dev", 2).with_users(10));
    let prod = Arc::new(MockStore::new("prod", 2).with_users(40));
    let registry = EnvironmentRegistry::with_dwell(
        vec![
            Environment::new("dev", dev.clone()),
            Environment::new("prod", prod.clone()),
        ],
        "dev",
        dwell,
    )
    .unwrap();
    Fixture {
        engine: Arc::new(ExecutionEngine::new(Arc::new(registry))),
        dev,
        prod,
    }
}

async fn count_on_active(engine: &ExecutionEngine) -> (String, usize) {
    match engine
        .run_query(None, "select id from users limit 1000", Some(1000))
        .await
    {
        ExecutionResult::Success(outcome) => (outcome.environment, outcome.rows.returned_count),
        other => panic!("Expected success, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_selection_routes_queries_until_revert() {
    let fx = fixture(Duration::from_secs(600));
    assert_eq!(count_on_active(&fx.engine).await, ("dev".to_string(), 10));

    fx.engine.registry().select("prod").await.unwrap();
    assert_eq!(count_on_active(&fx.engine).await, ("prod".to_string(), 40));

    tokio::time::sleep(Duration::from_secs(599)).await;
    assert_eq!(fx.engine.registry().current(), "prod");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(count_on_active(&fx.engine).await, ("dev".to_string(), 10));
}

#[tokio::test]
async fn test_explicit_environment_ignores_selection() {
    let fx = fixture(Duration::from_secs(600));
    fx.engine.registry().select("prod").await.unwrap();

    let result = fx
        .engine
        .run_query(Some("dev"), "select * from users limit 1000", Some(1000))
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(outcome.environment, "dev");
    assert_eq!(outcome.rows.returned_count, 10);
    assert_eq!(fx.engine.registry().current(), "prod");
}

#[tokio::test]
async fn test_concurrent_calls_share_a_small_pool() {
    let fx = fixture(Duration::from_secs(600));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let engine = Arc::clone(&fx.engine);
            tokio::spawn(async move {
                if i % 2 == 0 {
                    engine
                        .run_query(None, "select * from users limit 5", Some(3))
                        .await
                        .is_success()
                } else {
                    engine
                        .run_analysis(None, "select age from users limit 10", "data.length", None)
                        .await
                        .is_success()
                }
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap());
    }
    assert_eq!(fx.dev.leased(), 0);
    assert_eq!(fx.prod.leased(), 0);
}

#[tokio::test]
async fn test_failures_never_leak_connections() {
    let fx = fixture(Duration::from_secs(600));

    let statements = [
        "delete from users",
        "select * from users",
        "select * from orders limit 5",
        "select nope from users limit 5",
    ];
    for sql in statements {
        assert!(!fx.engine.run_query(None, sql, None).await.is_success());
    }

    let result = fx
        .engine
        .run_analysis(None, "select * from users limit 5", "data.map(r => r.x.y)", None)
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success envelope, got {result:?}");
    };
    assert!(outcome.evaluation_error().is_some());

    assert_eq!(fx.dev.leased(), 0);
    assert!(fx
        .engine
        .run_query(None, "select * from users limit 5", None)
        .await
        .is_success());
}

#[tokio::test]
async fn test_rejections_and_errors_render_as_envelopes() {
    let fx = fixture(Duration::from_secs(600));

    let rejected = fx
        .engine
        .run_query(None, "update users set age = 1", None)
        .await;
    assert!(matches!(
        rejected,
        ExecutionResult::Rejected(RejectReason::NotReadOnly)
    ));
    assert_eq!(rejected.to_json()["rejected"]["code"], json!("NOT_READ_ONLY"));

    let cap = fx
        .engine
        .run_query(None, "select * from users limit 5", Some(5001))
        .await;
    assert!(matches!(
        cap,
        ExecutionResult::Rejected(RejectReason::CapExceeded { requested: 5001, .. })
    ));

    let unknown = fx
        .engine
        .run_query(Some("qa"), "select * from users limit 5", None)
        .await;
    assert!(matches!(
        unknown,
        ExecutionResult::Error(GateError::UnknownEnvironment(ref name)) if name == "qa"
    ));
    assert_eq!(
        unknown.to_json()["error"]["category"],
        json!("Unknown Environment")
    );
}

#[tokio::test]
async fn test_analysis_sees_only_capped_rows() {
    let fx = fixture(Duration::from_secs(600));

    let result = fx
        .engine
        .run_analysis(
            Some("prod"),
            "select id, age from users limit 40",
            "data.length + ':' + data.map(r => r.id).max()",
            Some(7),
        )
        .await;
    let ExecutionResult::Success(outcome) = result else {
        panic!("Expected success, got {result:?}");
    };
    assert_eq!(outcome.result, json!("7:7"));
    assert_eq!(outcome.returned_count, 7);
    assert_eq!(outcome.total_available, 40);
    assert!(outcome.truncated);
    assert_eq!(outcome.columns, vec!["id", "age"]);
}

#[tokio::test]
async fn test_cap_applies_after_statement_limit() {
    let fx = fixture(Duration::from_secs(600));

    let result = fx
        .engine
        .run_query(None, "select id from users limit 5", Some(3))
        .await;
    let value = result.to_json();
    assert_eq!(value["returnedCount"], json!(3));
    assert_eq!(value["totalAvailable"], json!(5));
    assert_eq!(value["truncated"], json!(true));
    assert_eq!(value["rows"], json!([{"id": 1}, {"id": 2}, {"id": 3}]));
}
