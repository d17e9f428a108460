//! Lexical read-only classifier for SQL text.
//!
//! Accepts a statement iff, after trimming and lower-casing, it starts with
//! `select`, `with`, or `explain` and contains the substring `limit`
//! somewhere. The bound check is not clause-scoped: `limit` inside a quoted
//! literal or identifier also satisfies it.

use super::{GuardVerdict, RejectReason};
use tracing::debug;

/// Keywords a read-only statement may start with.
const READ_ONLY_PREFIXES: &[&str] = &["select", "with", "explain"];

/// Token that must appear somewhere in the statement.
const BOUND_TOKEN: &str = "limit";

/// SQL read-only/bounded-ness gate.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryGuard;

impl QueryGuard {
    /// Classifies `sql` without touching any store.
    pub fn classify(sql: &str) -> GuardVerdict {
        let normalized = sql.trim().to_lowercase();

        if !READ_ONLY_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
        {
            debug!("Query rejected: not read-only");
            return GuardVerdict::Rejected(RejectReason::NotReadOnly);
        }

        if !normalized.contains(BOUND_TOKEN) {
            debug!("Query rejected: missing bound");
            return GuardVerdict::Rejected(RejectReason::MissingBound);
        }

        GuardVerdict::Accepted
    }
}
