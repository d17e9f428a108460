//! Denylist scanner for analysis code.
//!
//! Scans the raw text (comments and string literals included) against a fixed,
//! ordered list of patterns. The first match wins. This is not static
//! analysis: string-built tokens or aliasing get past it, so the evaluator's
//! closed binding set remains the actual boundary.

use super::{GuardVerdict, RejectReason};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

/// Ordered `(pattern name, regex)` pairs.
pub const DENYLIST: &[(&str, &str)] = &[
    // Dynamic code construction
    ("eval()", r"\beval\s*\("),
    ("Function constructor", r"\bFunction\s*\("),
    ("constructor access", r"\bconstructor\b|__proto__|\bprototype\b"),
    ("require()", r"\brequire\s*\("),
    ("import", r"\bimport\b"),
    // Network
    ("fetch()", r"\bfetch\s*\("),
    ("XMLHttpRequest", r"\bXMLHttpRequest\b"),
    ("WebSocket", r"\bWebSocket\b"),
    ("http module", r"\bhttps?\s*\.\s*(get|request)\b"),
    ("socket access", r"\bnet\s*\.\s*(connect|createConnection|Socket)\b"),
    // Timers
    ("setTimeout", r"\bsetTimeout\b"),
    ("setInterval", r"\bsetInterval\b"),
    ("setImmediate", r"\bsetImmediate\b"),
    // Ambient process/global state
    ("process.env access", r"\bprocess\s*\.\s*env\b"),
    ("process access", r"\bprocess\b"),
    ("globalThis access", r"\bglobalThis\b"),
    ("global access", r"\bglobal\b"),
    ("window access", r"\bwindow\b"),
    // Nested datastore access
    ("database pool access", r"\bpool\s*\."),
    ("query call", r"\.\s*query\s*\("),
    ("connect call", r"\bconnect\s*\("),
    ("sql template", r"\bsql\s*`"),
    // Credentials
    (
        "credential keyword",
        r"(?i)\b(passwords?|passwd|secrets?|api_?keys?|tokens?|credentials?)\b",
    ),
];

static COMPILED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    DENYLIST
        .iter()
        .map(|(name, pattern)| (*name, Regex::new(pattern).expect("valid denylist regex")))
        .collect()
});

/// Analysis-code denylist gate.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeGuard;

impl CodeGuard {
    /// Classifies `code` against the denylist, first match wins.
    pub fn classify(code: &str) -> GuardVerdict {
        match COMPILED.iter().find(|(_, re)| re.is_match(code)) {
            Some((name, _)) => {
                warn!(pattern = name, "Analysis code rejected");
                GuardVerdict::Rejected(RejectReason::Denylisted((*name).to_string()))
            }
            None => GuardVerdict::Accepted,
        }
    }
}
