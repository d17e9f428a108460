//! Tool-surface tests: dispatch and the line-delimited serve loop.

use querygate::db::MockStore;
use querygate::engine::ExecutionEngine;
use querygate::registry::{Environment, EnvironmentRegistry};
use querygate::tools::{self, ToolCall, ToolResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::BufReader;

fn engine() -> ExecutionEngine {
    let registry = EnvironmentRegistry::new(
        vec![
            Environment::new("dev", Arc::new(MockStore::new("dev", 1).with_users(10))),
            Environment::new("prod", Arc::new(MockStore::new("prod", 1).with_users(3))),
        ],
        "dev",
    )
    .unwrap();
    ExecutionEngine::new(Arc::new(registry))
}

async fn call(engine: &ExecutionEngine, name: &str, arguments: Value) -> ToolResponse {
    tools::dispatch(
        engine,
        ToolCall {
            name: name.to_string(),
            arguments,
        },
    )
    .await
}

fn body(response: &ToolResponse) -> Value {
    serde_json::from_str(&response.content[0].text).unwrap()
}

#[tokio::test]
async fn test_select_then_query_without_environment() {
    let engine = engine();

    let selected = call(&engine, "select_environment", json!({"environment": "prod"})).await;
    assert!(!selected.is_error);
    assert_eq!(body(&selected)["revertsTo"], json!("dev"));

    let current = call(&engine, "current_environment", json!({})).await;
    assert_eq!(body(&current)["environment"], json!("prod"));
    assert_eq!(body(&current)["revertPending"], json!(true));

    let response = call(&engine, "run_query", json!({"query": "select * from users limit 50"})).await;
    assert!(!response.is_error);
    let result = body(&response);
    assert_eq!(result["environment"], json!("prod"));
    assert_eq!(result["returnedCount"], json!(3));
    assert_eq!(response.content.len(), 1);
}

#[tokio::test]
async fn test_truncated_query_adds_notice() {
    let engine = engine();
    let response = call(
        &engine,
        "run_query",
        json!({"query": "select id from users limit 10", "max_rows": 4}),
    )
    .await;

    assert!(!response.is_error);
    assert_eq!(response.content.len(), 2);
    assert_eq!(
        response.content[1].text,
        "Result truncated: showing 4 of 10 rows"
    );
    assert_eq!(body(&response)["totalAvailable"], json!(10));
}

#[tokio::test]
async fn test_rejections_are_error_responses() {
    let engine = engine();

    let response = call(&engine, "run_query", json!({"query": "drop table users"})).await;
    assert!(response.is_error);
    assert_eq!(body(&response)["rejected"]["code"], json!("NOT_READ_ONLY"));

    let response = call(
        &engine,
        "run_analysis",
        json!({"query": "select * from users limit 5", "code": "fetch('http://x')"}),
    )
    .await;
    assert!(response.is_error);
    assert_eq!(
        body(&response)["rejected"]["code"],
        json!("DENYLISTED_PATTERN")
    );

    let response = call(&engine, "select_environment", json!({"environment": "qa"})).await;
    assert!(response.is_error);
    assert!(response.joined_text().contains("qa"));
}

#[tokio::test]
async fn test_analysis_error_is_not_a_tool_error() {
    let engine = engine();
    let response = call(
        &engine,
        "run_analysis",
        json!({"query": "select * from users limit 5", "code": "data.nope()"}),
    )
    .await;

    assert!(!response.is_error);
    let message = body(&response)["result"]["error"].as_str().unwrap().to_string();
    assert!(message.contains("nope"), "unexpected message: {message}");
}

#[tokio::test]
async fn test_probe_all_environments() {
    let engine = engine();
    let response = call(&engine, "probe_environment", json!({})).await;

    assert!(!response.is_error);
    let reports = body(&response);
    let names: Vec<&str> = reports
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["environment"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["dev", "prod"]);
}

#[tokio::test]
async fn test_serve_session() {
    let engine = engine();
    let input = [
        json!({"name": "list_environments"}).to_string(),
        String::new(),
        "not json".to_string(),
        json!({"name": "run_analysis", "arguments": {
            "query": "select age from users limit 10",
            "code": "data.map(r => r.age).sum()"
        }})
        .to_string(),
    ]
    .join("\n");

    let mut output = Vec::new();
    tools::serve(&engine, BufReader::new(input.as_bytes()), &mut output)
        .await
        .unwrap();

    let responses: Vec<ToolResponse> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(responses.len(), 3);

    let envs = body(&responses[0]);
    assert_eq!(envs.as_array().unwrap().len(), 2);
    assert_eq!(envs[0]["active"], json!(true));

    assert!(responses[1].is_error);
    assert!(responses[1].joined_text().starts_with("Invalid tool call"));

    // Ages are 20 + id % 30 for ids 1..=10.
    assert_eq!(body(&responses[2])["result"], json!(255));
}
