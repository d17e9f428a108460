//! Result and pool types shared by every store backend.

use serde::Serialize;
use serde_json::{Map, Value};

/// One result row: field name to scalar/JSON value, in column order.
pub type Record = Map<String, Value>;

/// Everything a single statement returned, before shaping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fetched {
    /// Column names in select-list order.
    pub columns: Vec<String>,

    /// Every row the store produced.
    pub records: Vec<Record>,
}

impl Fetched {
    /// Builds a fetched result from column names and positional rows.
    ///
    /// Extra values beyond the column list are dropped; missing values become null.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let records = rows
            .into_iter()
            .map(|row| {
                let mut values = row.into_iter();
                columns
                    .iter()
                    .map(|name| (name.clone(), values.next().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();
        Self { columns, records }
    }

    /// Returns true if the statement produced no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections currently open (leased or idle).
    pub size: u32,

    /// Open connections not currently leased.
    pub idle: usize,
}
