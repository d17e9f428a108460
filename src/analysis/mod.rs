//! Sandboxed evaluation of analysis code over fetched rows.
//!
//! Analysis code is a small JavaScript-flavoured expression language. The
//! only names in scope are `data`, `table` and a handful of pure utility
//! namespaces; there is no way to name a process, network, filesystem or
//! database handle. Evaluation is bounded by a step budget and a deadline
//! and runs on the blocking pool.

mod ast;
mod builtins;
mod interp;
mod parser;
mod value;

use crate::db::Record;
use interp::{Interpreter, Scope};
use serde_json::{json, Value as Json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use value::{format_number, number_to_json, Value};

/// Arrays longer than this are reported as `{items, total, truncated}`.
pub const DISPLAY_CAP: usize = 100;

/// Rows included in a frame preview.
pub const FRAME_PREVIEW_ROWS: usize = 10;

/// Default step budget for one evaluation.
pub const DEFAULT_MAX_STEPS: u64 = 10_000_000;

/// Default wall-clock budget for one evaluation.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default parser nesting limit.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default cap on the byte length of any string analysis code builds.
pub const DEFAULT_MAX_STRING_LEN: usize = 4 * 1024 * 1024;

/// Nesting beyond this is elided when rendering results.
const MAX_RENDER_DEPTH: usize = 32;

/// Extra time the async wrapper allows past the interpreter's own deadline.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// Evaluation failures. These are reported as `{"error": message}` values,
/// never as engine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("{0}")]
    Runtime(String),

    #[error("Evaluation exceeded its budget of {0} steps")]
    StepBudget(u64),

    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("RangeError: string length exceeds the limit of {0} bytes")]
    StringLength(usize),
}

impl EvalError {
    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Runtime(format!("TypeError: {}", msg.into()))
    }
}

/// Resource limits for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_steps: u64,
    pub timeout: Duration,
    pub max_depth: usize,
    pub max_string_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout: DEFAULT_EVAL_TIMEOUT,
            max_depth: DEFAULT_MAX_DEPTH,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

/// Evaluates `code` against `rows` on the current thread and renders the
/// result.
pub fn evaluate(code: &str, rows: &[Record], limits: Limits) -> Result<Json, EvalError> {
    let program = parser::parse(code, limits.max_depth)?;
    let data = Value::array(rows.iter().map(record_value).collect());

    let mut interp = Interpreter::new(limits);
    let result = interp.run(&program, Scope::root(data));
    debug!(steps = interp.steps(), ok = result.is_ok(), "Analysis evaluated");
    Ok(render(&result?))
}

/// Evaluates on the blocking pool. Never fails: errors, budget exhaustion and
/// timeouts come back as `{"error": message}`.
pub async fn evaluate_guarded(code: String, rows: Vec<Record>, limits: Limits) -> Json {
    let timeout = limits.timeout;
    let task = tokio::task::spawn_blocking(move || evaluate(&code, &rows, limits));

    match tokio::time::timeout(timeout + DEADLINE_GRACE, task).await {
        Ok(Ok(Ok(value))) => value,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "Analysis evaluation failed");
            error_value(e.to_string())
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Analysis task aborted");
            error_value(format!("Evaluation aborted: {e}"))
        }
        Err(_) => {
            warn!(?timeout, "Analysis task missed its deadline");
            error_value(EvalError::Timeout(timeout).to_string())
        }
    }
}

/// The `{"error": message}` value.
pub fn error_value(message: impl Into<String>) -> Json {
    json!({ "error": message.into() })
}

fn record_value(record: &Record) -> Value {
    Value::object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect(),
    )
}

/// Converts a result value to its display form: long arrays are capped,
/// frames become previews, functions and non-finite numbers are sanitized.
fn render(value: &Value) -> Json {
    render_at(value, 0)
}

fn render_at(value: &Value, depth: usize) -> Json {
    if depth > MAX_RENDER_DEPTH {
        return Json::String("[nested too deeply]".to_string());
    }
    match value {
        Value::Undefined | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(*n).unwrap_or_else(|| Json::String(format_number(*n))),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Array(items) => render_list(items, depth),
        Value::Object(object) => Json::Object(
            object
                .iter()
                .map(|(k, v)| (k.clone(), render_at(v, depth + 1)))
                .collect(),
        ),
        Value::Closure(_) | Value::Builtin(_) => Json::String("[function]".to_string()),
        Value::Namespace(ns) => Json::String(format!("[namespace {}]", ns.as_str())),
        Value::Frame(frame) => json!({
            "shape": [frame.rows.len(), frame.columns.len()],
            "columns": frame.columns,
            "head": frame
                .rows
                .iter()
                .take(FRAME_PREVIEW_ROWS)
                .map(|row| render_at(row, depth + 1))
                .collect::<Vec<_>>(),
        }),
        Value::Grouped(grouped) => {
            let keys: Vec<Value> = grouped.groups.iter().map(|(key, _)| key.clone()).collect();
            json!({
                "groupedBy": grouped.by,
                "groups": grouped.groups.len(),
                "keys": render_list(&keys, depth),
            })
        }
    }
}

fn render_list(items: &[Value], depth: usize) -> Json {
    let rendered: Vec<Json> = items
        .iter()
        .take(DISPLAY_CAP)
        .map(|item| render_at(item, depth + 1))
        .collect();
    if items.len() > DISPLAY_CAP {
        json!({ "items": rendered, "total": items.len(), "truncated": true })
    } else {
        Json::Array(rendered)
    }
}
