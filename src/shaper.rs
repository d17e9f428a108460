//! Result shaping shared by every execution path.
//!
//! Pure and deterministic: no I/O, no logging. Both the query path and the
//! analysis path go through [`shape`], so truncation policy cannot diverge.

use crate::db::{Fetched, Record};
use serde::Serialize;

/// Engine-wide maximum row count no caller-supplied cap may exceed.
pub const HARD_CEILING: usize = 5000;

/// Row cap used by `run_query` when the caller gives none.
pub const DEFAULT_QUERY_CAP: usize = 100;

/// Row cap used by `run_analysis` when the caller gives none.
pub const DEFAULT_ANALYSIS_CAP: usize = 1000;

/// A bounded, ordered result carrying both returned and available counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    pub returned_count: usize,
    pub total_available: usize,
    pub truncated: bool,
}

impl RowSet {
    /// Truncates further, keeping `total_available` from the original fetch.
    ///
    /// Reshaping with an equal-or-larger cap is a no-op.
    pub fn reshape(mut self, cap: usize, hard_ceiling: usize) -> Self {
        let limit = cap.min(hard_ceiling);
        self.rows.truncate(limit);
        self.returned_count = self.rows.len();
        self.truncated = self.returned_count < self.total_available;
        self
    }

    /// Returns a one-line truncation notice, if rows were dropped.
    pub fn truncation_notice(&self) -> Option<String> {
        self.truncated.then(|| {
            format!(
                "Result truncated: showing {} of {} rows",
                self.returned_count, self.total_available
            )
        })
    }
}

/// Shapes freshly fetched rows to `min(len, cap, hard_ceiling)`.
pub fn shape(fetched: Fetched, cap: usize, hard_ceiling: usize) -> RowSet {
    let Fetched { columns, records } = fetched;
    let total_available = records.len();

    RowSet {
        columns,
        rows: records,
        returned_count: total_available,
        total_available,
        truncated: false,
    }
    .reshape(cap, hard_ceiling)
}
