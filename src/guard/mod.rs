//! Capability guards for incoming requests.
//!
//! Guards are pure, side-effect-free classifiers that accept or reject a
//! request before anything touches a store. They are lexical speed bumps, not
//! parsers: the store sessions are read-only and the analysis language has no
//! ambient capabilities, so the guards are one layer of several.

mod code;
mod query;

pub use code::{CodeGuard, DENYLIST};
pub use query::QueryGuard;

use serde::Serialize;
use std::fmt;

/// Why a request was turned away before execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// The statement does not start with a read-only keyword.
    NotReadOnly,
    /// The statement carries no row bound (`limit`).
    MissingBound,
    /// The analysis code matched a denylisted pattern.
    Denylisted(String),
    /// The requested row cap is above the engine's hard ceiling.
    CapExceeded { requested: usize, ceiling: usize },
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReadOnly => "NOT_READ_ONLY",
            Self::MissingBound => "MISSING_BOUND",
            Self::Denylisted(_) => "DENYLISTED_PATTERN",
            Self::CapExceeded { .. } => "CAP_EXCEEDED",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReadOnly => {
                write!(f, "Only SELECT, WITH, or EXPLAIN statements are allowed")
            }
            Self::MissingBound => write!(f, "Query must include a LIMIT clause"),
            Self::Denylisted(pattern) => write!(f, "Code contains forbidden pattern: {pattern}"),
            Self::CapExceeded { requested, ceiling } => write!(
                f,
                "Requested {requested} rows, which exceeds the maximum of {ceiling}"
            ),
        }
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Accepted,
    Rejected(RejectReason),
}

impl GuardVerdict {
    /// Returns true if the request may proceed.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Converts into a `Result`, for chaining checks with `?`.
    pub fn into_result(self) -> std::result::Result<(), RejectReason> {
        match self {
            Self::Accepted => Ok(()),
            Self::Rejected(reason) => Err(reason),
        }
    }
}
