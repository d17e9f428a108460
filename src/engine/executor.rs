//! Query and analysis execution with capability checks.
//!
//! Every check that can reject a request runs before a connection is
//! leased. The lease is released when its guard drops, on every exit path,
//! and before analysis code is evaluated.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value as Json};
use tracing::{debug, error, info, warn};

use crate::analysis::{self, Limits};
use crate::error::{GateError, Result};
use crate::guard::{CodeGuard, QueryGuard, RejectReason};
use crate::registry::{Environment, EnvironmentRegistry};
use crate::shaper::{shape, RowSet, DEFAULT_ANALYSIS_CAP, DEFAULT_QUERY_CAP, HARD_CEILING};

/// Executes guarded requests against the registry's environments.
pub struct ExecutionEngine {
    registry: Arc<EnvironmentRegistry>,
    limits: Limits,
}

impl ExecutionEngine {
    /// Creates an engine with default evaluation limits.
    pub fn new(registry: Arc<EnvironmentRegistry>) -> Self {
        Self {
            registry,
            limits: Limits::default(),
        }
    }

    /// Overrides the evaluation limits.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// The registry this engine executes against.
    pub fn registry(&self) -> &Arc<EnvironmentRegistry> {
        &self.registry
    }

    /// Runs a read-only, bounded statement.
    ///
    /// `environment` of `None` means the active selection at call start.
    pub async fn run_query(
        &self,
        environment: Option<&str>,
        sql: &str,
        cap: Option<usize>,
    ) -> ExecutionResult<QueryOutcome> {
        let start = Instant::now();
        let cap = cap.unwrap_or(DEFAULT_QUERY_CAP);

        if let Err(reason) = QueryGuard::classify(sql)
            .into_result()
            .and_then(|()| check_cap(cap))
        {
            warn!(reason = %reason, "Query rejected");
            return ExecutionResult::Rejected(reason);
        }

        let env = match self.registry.resolve(environment) {
            Ok(env) => env,
            Err(e) => return ExecutionResult::Error(e),
        };

        match fetch_shaped(&env, sql, cap).await {
            Ok(rows) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(
                    environment = env.name(),
                    returned = rows.returned_count,
                    total = rows.total_available,
                    elapsed_ms,
                    "Query executed"
                );
                ExecutionResult::Success(QueryOutcome {
                    environment: env.name().to_string(),
                    rows,
                    elapsed_ms,
                })
            }
            Err(e) => {
                log_failure(env.name(), "Query failed", &e);
                ExecutionResult::Error(e)
            }
        }
    }

    /// Runs a statement, then evaluates `code` over the shaped rows.
    ///
    /// Both guards and the cap check run before the lease; evaluation
    /// failures are reported as `{"error": message}` in a successful result.
    pub async fn run_analysis(
        &self,
        environment: Option<&str>,
        sql: &str,
        code: &str,
        cap: Option<usize>,
    ) -> ExecutionResult<AnalysisOutcome> {
        let start = Instant::now();
        let cap = cap.unwrap_or(DEFAULT_ANALYSIS_CAP);

        if let Err(reason) = QueryGuard::classify(sql)
            .into_result()
            .and_then(|()| CodeGuard::classify(code).into_result())
            .and_then(|()| check_cap(cap))
        {
            warn!(reason = %reason, "Analysis rejected");
            return ExecutionResult::Rejected(reason);
        }

        let env = match self.registry.resolve(environment) {
            Ok(env) => env,
            Err(e) => return ExecutionResult::Error(e),
        };

        let RowSet {
            columns,
            rows,
            returned_count,
            total_available,
            truncated,
        } = match fetch_shaped(&env, sql, cap).await {
            Ok(rows) => rows,
            Err(e) => {
                log_failure(env.name(), "Analysis query failed", &e);
                return ExecutionResult::Error(e);
            }
        };

        let result = analysis::evaluate_guarded(code.to_string(), rows, self.limits).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            environment = env.name(),
            rows = returned_count,
            elapsed_ms,
            "Analysis executed"
        );

        ExecutionResult::Success(AnalysisOutcome {
            environment: env.name().to_string(),
            result,
            columns,
            returned_count,
            total_available,
            truncated,
            elapsed_ms,
        })
    }
}

fn check_cap(cap: usize) -> std::result::Result<(), RejectReason> {
    if cap > HARD_CEILING {
        Err(RejectReason::CapExceeded {
            requested: cap,
            ceiling: HARD_CEILING,
        })
    } else {
        Ok(())
    }
}

/// Leases, fetches, releases, then shapes.
async fn fetch_shaped(env: &Environment, sql: &str, cap: usize) -> Result<RowSet> {
    let mut lease = env.pool().acquire().await?;
    debug!(environment = env.name(), "Connection leased");
    let fetched = lease.fetch_all(sql).await?;
    drop(lease);
    if fetched.is_empty() {
        debug!(environment = env.name(), columns = fetched.columns.len(), "Statement returned no rows");
    }
    Ok(shape(fetched, cap, HARD_CEILING))
}

/// Unreachable stores are logged as errors; anything the store itself
/// refused is a warning.
fn log_failure(environment: &str, message: &str, e: &GateError) {
    if e.is_connectivity() {
        error!(environment, error = %e, "{message}: store unreachable");
    } else {
        warn!(environment, category = e.category(), error = %e, "{message}");
    }
}

/// Result of an engine call. Rejections and failures are values, never
/// panics or thrown errors.
#[derive(Debug)]
pub enum ExecutionResult<T> {
    /// The request ran.
    Success(T),
    /// A guard or the cap check turned the request away before execution.
    Rejected(RejectReason),
    /// Environment lookup, connectivity, or the store failed.
    Error(GateError),
}

impl<T: Serialize> ExecutionResult<T> {
    /// Returns true for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Plain JSON envelope used at the tool boundary.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Success(outcome) => serde_json::to_value(outcome)
                .unwrap_or_else(|e| json!({ "error": { "category": "Internal", "message": e.to_string() } })),
            Self::Rejected(reason) => json!({
                "rejected": {
                    "code": reason.code(),
                    "reason": reason,
                    "message": reason.to_string(),
                }
            }),
            Self::Error(error) => json!({
                "error": {
                    "category": error.category(),
                    "message": error.to_string(),
                }
            }),
        }
    }
}

/// Successful query outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    /// Environment the statement ran in.
    pub environment: String,
    /// The shaped rows.
    #[serde(flatten)]
    pub rows: RowSet,
    pub elapsed_ms: u64,
}

/// Successful analysis outcome. The rows themselves are not echoed back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub environment: String,
    /// Rendered evaluation result, or `{"error": message}`.
    pub result: Json,
    pub columns: Vec<String>,
    pub returned_count: usize,
    pub total_available: usize,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl AnalysisOutcome {
    /// The evaluation error message, if evaluation failed.
    pub fn evaluation_error(&self) -> Option<&str> {
        match &self.result {
            Json::Object(map) if map.len() == 1 => map.get("error").and_then(Json::as_str),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockStore, StorePool};
    use crate::error::StoreErrorCategory;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn engine_with(store: Arc<MockStore>) -> ExecutionEngine {
        let registry =
            EnvironmentRegistry::new(vec![Environment::new("dev", store)], "dev").unwrap();
        ExecutionEngine::new(Arc::new(registry))
    }

    fn users(capacity: u32) -> Arc<MockStore> {
        Arc::new(
            MockStore::new("dev", capacity)
                .with_users(10)
                .with_acquire_timeout(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn test_cap_applies_to_fetched_rows() {
        let engine = engine_with(users(1));
        let result = engine
            .run_query(None, "select id from users limit 5", Some(3))
            .await;

        match result {
            ExecutionResult::Success(outcome) => {
                assert_eq!(outcome.environment, "dev");
                assert_eq!(outcome.rows.returned_count, 3);
                assert_eq!(outcome.rows.total_available, 5);
                assert!(outcome.rows.truncated);
                assert_eq!(outcome.rows.columns, vec!["id"]);
            }
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_default_query_cap() {
        let engine = engine_with(users(1));
        let result = engine.run_query(None, "select * from users limit 200", None).await;
        let ExecutionResult::Success(outcome) = result else {
            panic!("Expected success");
        };
        assert_eq!(outcome.rows.returned_count, 10);
        assert!(!outcome.rows.truncated);
    }

    #[tokio::test]
    async fn test_guard_rejections() {
        let engine = engine_with(users(1));

        let result = engine.run_query(None, "SELECT 1", None).await;
        assert!(matches!(result, ExecutionResult::Rejected(RejectReason::MissingBound)));

        let result = engine.run_query(None, "DELETE FROM users LIMIT 1", None).await;
        assert!(matches!(result, ExecutionResult::Rejected(RejectReason::NotReadOnly)));
    }

    #[tokio::test]
    async fn test_rejections_never_touch_the_store() {
        // A zero-capacity pool fails every acquire, so reaching it would
        // surface as PoolExhausted instead of a rejection.
        let engine = engine_with(Arc::new(MockStore::new("dev", 0).with_users(3)));

        let result = engine
            .run_query(None, "select * from users limit 10", Some(HARD_CEILING + 1))
            .await;
        assert!(matches!(
            result,
            ExecutionResult::Rejected(RejectReason::CapExceeded {
                requested: 5001,
                ceiling: 5000
            })
        ));

        let result = engine
            .run_analysis(
                None,
                "select * from users limit 10",
                "return data.length; // process.env.SECRET",
                None,
            )
            .await;
        match result {
            ExecutionResult::Rejected(RejectReason::Denylisted(pattern)) => {
                assert_eq!(pattern, "process.env access");
            }
            other => panic!("Expected denylist rejection, got {other:?}"),
        }

        let result = engine
            .run_analysis(None, "select * from users limit 10", "data.length", Some(6000))
            .await;
        assert!(matches!(
            result,
            ExecutionResult::Rejected(RejectReason::CapExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_capacity_one_pool_survives_failures() {
        let store = users(1);
        let engine = engine_with(store.clone());

        // Guard failure.
        let result = engine.run_query(None, "select * from users", None).await;
        assert!(matches!(result, ExecutionResult::Rejected(_)));
        assert_eq!(store.leased(), 0);

        // Store failure.
        let result = engine.run_query(None, "select * from missing limit 5", None).await;
        match result {
            ExecutionResult::Error(GateError::Store(e)) => {
                assert_eq!(e.category, StoreErrorCategory::MissingRelation);
            }
            other => panic!("Expected store error, got {other:?}"),
        }
        assert_eq!(store.leased(), 0);

        // Evaluation failure.
        let result = engine
            .run_analysis(None, "select * from users limit 5", "data.nope()", None)
            .await;
        let ExecutionResult::Success(outcome) = result else {
            panic!("Expected success envelope");
        };
        assert_eq!(
            outcome.evaluation_error(),
            Some("TypeError: array.nope is not a function")
        );
        assert_eq!(store.leased(), 0);

        // Both follow-up calls still get the single connection.
        for _ in 0..2 {
            let result = engine.run_query(None, "select id from users limit 2", None).await;
            assert!(result.is_success());
        }
        assert_eq!(store.leased(), 0);
    }

    #[tokio::test]
    async fn test_analysis_over_shaped_rows() {
        let engine = engine_with(users(1));
        let result = engine
            .run_analysis(
                None,
                "select * from users limit 10",
                "data.filter(u => u.age > 25).length",
                Some(8),
            )
            .await;

        let ExecutionResult::Success(outcome) = result else {
            panic!("Expected success");
        };
        // Ages are 21..=30; the cap keeps ids 1..=8, of which 6, 7, 8 qualify.
        assert_eq!(outcome.result, json!(3));
        assert_eq!(outcome.returned_count, 8);
        assert_eq!(outcome.total_available, 10);
        assert!(outcome.truncated);
        assert_eq!(outcome.evaluation_error(), None);
    }

    #[tokio::test]
    async fn test_analysis_budget_reported_as_value() {
        let engine = engine_with(users(1)).with_limits(Limits {
            max_steps: 200,
            ..Limits::default()
        });
        let result = engine
            .run_analysis(
                None,
                "select * from users limit 10",
                "data.map(a => data.map(b => a.id * b.id))",
                None,
            )
            .await;
        let ExecutionResult::Success(outcome) = result else {
            panic!("Expected success envelope");
        };
        assert_eq!(
            outcome.evaluation_error(),
            Some("Evaluation exceeded its budget of 200 steps")
        );
    }

    #[tokio::test]
    async fn test_pool_exhausted_when_connection_held() {
        let store = users(1);
        let engine = engine_with(store.clone());

        let held = store.acquire().await.unwrap();
        let result = engine.run_query(None, "select id from users limit 1", None).await;
        assert!(matches!(
            result,
            ExecutionResult::Error(GateError::PoolExhausted { .. })
        ));

        drop(held);
        let result = engine.run_query(None, "select id from users limit 1", None).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let engine = engine_with(users(1));
        let result = engine
            .run_query(Some("prod"), "select id from users limit 1", None)
            .await;
        assert!(matches!(
            result,
            ExecutionResult::Error(GateError::UnknownEnvironment(name)) if name == "prod"
        ));
    }

    #[tokio::test]
    async fn test_envelope_json() {
        let engine = engine_with(users(1));

        let ok = engine
            .run_query(None, "select id from users limit 5", Some(2))
            .await
            .to_json();
        assert_eq!(ok["returnedCount"], json!(2));
        assert_eq!(ok["totalAvailable"], json!(5));
        assert_eq!(ok["rows"], json!([{"id": 1}, {"id": 2}]));

        let rejected = engine.run_query(None, "SELECT 1", None).await.to_json();
        assert_eq!(rejected["rejected"]["code"], json!("MISSING_BOUND"));

        let failed = engine
            .run_query(None, "select * from missing limit 1", None)
            .await
            .to_json();
        assert!(failed["error"]["message"].as_str().unwrap().contains("42P01"));
    }
}
