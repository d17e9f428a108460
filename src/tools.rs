//! Tool-call surface over the engine.
//!
//! Plain data in, plain data out: a call is `{name, arguments}` and every
//! response is `{content: [{type: "text", text}], isError}`. Unknown tools and
//! malformed arguments become error responses.

use crate::engine::{ExecutionEngine, ExecutionResult};
use crate::error::{GateError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Tool definition advertised to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Json,
}

/// An incoming tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Json,
}

/// One content block of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Response to a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResponse {
    fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text: text.into(),
            }],
            is_error,
        }
    }

    fn json(value: &Json, is_error: bool) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::text(text, is_error)
    }

    fn error(message: impl Into<String>) -> Self {
        Self::text(message, true)
    }

    fn with_note(mut self, note: Option<String>) -> Self {
        if let Some(text) = note {
            self.content.push(ToolContent {
                kind: "text".to_string(),
                text,
            });
        }
        self
    }

    /// Concatenated text of every content block.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Input for `select_environment`.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectEnvironmentInput {
    pub environment: String,
}

/// Input for `probe_environment`; no environment probes all of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeEnvironmentInput {
    #[serde(default)]
    pub environment: Option<String>,
}

/// Input for `run_query`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunQueryInput {
    pub query: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default, alias = "max_rows")]
    pub cap: Option<usize>,
}

/// Input for `run_analysis`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunAnalysisInput {
    pub query: String,
    pub code: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default, alias = "max_rows")]
    pub cap: Option<usize>,
}

/// Returns the tool definitions exposed by [`dispatch`].
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    let environment = json!({
        "type": "string",
        "description": "Environment to run against (optional; defaults to the active one)"
    });
    let cap = json!({
        "type": "integer",
        "minimum": 0,
        "description": "Maximum rows to return (must not exceed 5000)"
    });

    vec![
        ToolDefinition {
            name: "list_environments".to_string(),
            description: "List configured database environments, their backends, and which one \
                          is active."
                .to_string(),
            input_schema: json!({ "type": "object", "properties": {}, "required": [] }),
        },
        ToolDefinition {
            name: "current_environment".to_string(),
            description: "Show the active environment and any pending revert to the default."
                .to_string(),
            input_schema: json!({ "type": "object", "properties": {}, "required": [] }),
        },
        ToolDefinition {
            name: "select_environment".to_string(),
            description: "Switch the active environment. Non-default selections revert to the \
                          default after ten minutes unless reselected."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "environment": { "type": "string", "description": "Environment name" } },
                "required": ["environment"]
            }),
        },
        ToolDefinition {
            name: "probe_environment".to_string(),
            description: "Check connectivity by running SELECT 1. Probes every environment when \
                          none is given."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "environment": environment },
                "required": []
            }),
        },
        ToolDefinition {
            name: "run_query".to_string(),
            description: "Run a read-only SQL statement. Must start with SELECT, WITH, or EXPLAIN \
                          and include a LIMIT."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "SQL statement" },
                    "environment": environment,
                    "cap": cap
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "run_analysis".to_string(),
            description: "Run a read-only SQL statement, then evaluate a JavaScript-style \
                          expression over the rows. The code sees `data` (array of row objects), \
                          `table` (tabular helpers), and Math, Date, JSON, Object, Number, String."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "SQL statement" },
                    "code": { "type": "string", "description": "Analysis expression or program" },
                    "environment": environment,
                    "cap": cap
                },
                "required": ["query", "code"]
            }),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Json) -> std::result::Result<T, ToolResponse> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments)
        .map_err(|e| ToolResponse::error(format!("Invalid arguments for {tool}: {e}")))
}

fn error_response(error: &GateError) -> ToolResponse {
    ToolResponse::json(
        &json!({ "error": { "category": error.category(), "message": error.to_string() } }),
        true,
    )
}

/// Executes one tool call.
pub async fn dispatch(engine: &ExecutionEngine, call: ToolCall) -> ToolResponse {
    debug!(tool = %call.name, "Dispatching tool call");
    let response = match dispatch_inner(engine, call).await {
        Ok(response) | Err(response) => response,
    };
    if response.is_error {
        debug!("Tool call returned an error response");
    }
    response
}

async fn dispatch_inner(
    engine: &ExecutionEngine,
    call: ToolCall,
) -> std::result::Result<ToolResponse, ToolResponse> {
    let registry = engine.registry();

    match call.name.as_str() {
        "list_tools" => Ok(ToolResponse::json(
            &serde_json::to_value(get_tool_definitions()).unwrap_or_default(),
            false,
        )),
        "list_environments" => Ok(ToolResponse::json(
            &serde_json::to_value(registry.list()).unwrap_or_default(),
            false,
        )),
        "current_environment" => {
            let selection = registry.selection();
            let revert_in_secs = selection.revert_at.map(|at| {
                at.saturating_duration_since(tokio::time::Instant::now())
                    .as_secs()
            });
            Ok(ToolResponse::json(
                &json!({
                    "environment": selection.active,
                    "default": registry.default_name(),
                    "revertPending": selection.revert_pending(),
                    "revertInSecs": revert_in_secs,
                }),
                false,
            ))
        }
        "select_environment" => {
            let input: SelectEnvironmentInput = parse_args(&call.name, call.arguments)?;
            registry
                .select(&input.environment)
                .await
                .map_err(|e| error_response(&e))?;
            let is_default = input.environment == registry.default_name();
            Ok(ToolResponse::json(
                &json!({
                    "environment": input.environment,
                    "revertsTo": (!is_default).then(|| registry.default_name()),
                    "revertInSecs": (!is_default).then(|| registry.dwell().as_secs()),
                }),
                false,
            ))
        }
        "probe_environment" => {
            let input: ProbeEnvironmentInput = parse_args(&call.name, call.arguments)?;
            let reports = match input.environment {
                Some(name) => vec![registry.probe(&name).await.map_err(|e| error_response(&e))?],
                None => registry.probe_all().await,
            };
            let unhealthy = reports.iter().any(|r| !r.healthy);
            Ok(ToolResponse::json(
                &serde_json::to_value(reports).unwrap_or_default(),
                unhealthy,
            ))
        }
        "run_query" => {
            let input: RunQueryInput = parse_args(&call.name, call.arguments)?;
            let result = engine
                .run_query(input.environment.as_deref(), &input.query, input.cap)
                .await;
            let notice = match &result {
                ExecutionResult::Success(outcome) => outcome.rows.truncation_notice(),
                _ => None,
            };
            Ok(ToolResponse::json(&result.to_json(), !result.is_success()).with_note(notice))
        }
        "run_analysis" => {
            let input: RunAnalysisInput = parse_args(&call.name, call.arguments)?;
            let result = engine
                .run_analysis(
                    input.environment.as_deref(),
                    &input.query,
                    &input.code,
                    input.cap,
                )
                .await;
            Ok(ToolResponse::json(&result.to_json(), !result.is_success()))
        }
        other => Err(ToolResponse::error(format!("Unknown tool: {other}"))),
    }
}

/// Serves newline-delimited tool calls until `reader` reaches end of input.
///
/// Each input line is one JSON `ToolCall`; each output line is one JSON
/// `ToolResponse`. Lines that are not valid calls get an error response.
pub async fn serve<R, W>(engine: &ExecutionEngine, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0u64;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| GateError::internal(format!("Failed to read request: {e}")))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ToolCall>(line) {
            Ok(call) => dispatch(engine, call).await,
            Err(e) => {
                warn!(error = %e, "Malformed tool call");
                ToolResponse::error(format!("Invalid tool call: {e}"))
            }
        };

        let mut encoded = serde_json::to_string(&response)
            .map_err(|e| GateError::internal(format!("Failed to encode response: {e}")))?;
        encoded.push('\n');
        writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| GateError::internal(format!("Failed to write response: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| GateError::internal(format!("Failed to write response: {e}")))?;
        handled += 1;
    }

    info!(handled, "Tool input closed");
    Ok(())
}
