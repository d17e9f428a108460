//! In-memory store for testing.
//!
//! `MockStore` holds named tables and answers a tiny SQL subset
//! (`select <cols|*> from <table> [... limit n]` and `select <literal>`).
//! Its capacity is a semaphore, so tests can observe leaked leases exactly
//! like a real pool would exhibit them.

use super::{DatabaseBackend, Fetched, Lease, PoolStats, StoreConnection, StorePool};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

static SELECT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\s+(.+?)\s+from\s+([A-Za-z_][A-Za-z0-9_]*)(.*)$")
        .expect("valid regex")
});

static LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\blimit\s+(\d+)").expect("valid regex"));

static SELECT_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*select\s+(-?\d+)\s*;?\s*$").expect("valid regex"));

#[derive(Debug, Clone, Default)]
struct MockTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// A mock store that serves predefined tables.
#[derive(Debug)]
pub struct MockStore {
    label: String,
    tables: Arc<HashMap<String, MockTable>>,
    capacity: u32,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl MockStore {
    /// Creates a mock store with no tables.
    pub fn new(label: &str, capacity: u32) -> Self {
        Self {
            label: label.to_string(),
            tables: Arc::new(HashMap::new()),
            capacity,
            permits: Arc::new(Semaphore::new(capacity as usize)),
            acquire_timeout: Duration::from_millis(200),
        }
    }

    /// Adds a table with the given columns and positional rows.
    pub fn with_table(mut self, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let table = MockTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        };
        Arc::make_mut(&mut self.tables).insert(name.to_lowercase(), table);
        self
    }

    /// Sets how long `acquire` waits for a free slot.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// A `users` table with ids `1..=n`, used by demos and tests.
    pub fn with_users(self, n: i64) -> Self {
        let rows = (1..=n)
            .map(|id| {
                vec![
                    Value::from(id),
                    Value::from(format!("user{id}@example.com")),
                    Value::from(20 + id % 30),
                ]
            })
            .collect();
        self.with_table("users", &["id", "email", "age"], rows)
    }

    /// Number of connections currently leased.
    pub fn leased(&self) -> usize {
        self.capacity as usize - self.permits.available_permits()
    }
}

#[async_trait]
impl StorePool for MockStore {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Mock
    }

    async fn acquire(&self) -> Result<Lease> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| GateError::PoolExhausted {
                environment: self.label.clone(),
            })?
            .map_err(|_| GateError::connection(format!("{}: pool is closed", self.label)))?;

        Ok(Lease::new(Box::new(MockConnection {
            tables: Arc::clone(&self.tables),
            _permit: permit,
        })))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.capacity,
            idle: self.permits.available_permits(),
        }
    }

    async fn close(&self) {
        self.permits.close();
    }
}

struct MockConnection {
    tables: Arc<HashMap<String, MockTable>>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl StoreConnection for MockConnection {
    async fn fetch_all(&mut self, sql: &str) -> Result<Fetched> {
        if let Some(caps) = SELECT_LITERAL.captures(sql) {
            let n: i64 = caps[1]
                .parse()
                .map_err(|_| GateError::store(Some("42601"), "invalid literal"))?;
            return Ok(Fetched::from_rows(
                vec!["?column?".to_string()],
                vec![vec![Value::from(n)]],
            ));
        }

        let caps = SELECT_FROM
            .captures(sql)
            .ok_or_else(|| GateError::store(Some("42601"), format!("syntax error in: {sql}")))?;

        let table_name = caps[2].to_lowercase();
        let table = self.tables.get(&table_name).ok_or_else(|| {
            GateError::store(
                Some("42P01"),
                format!("relation \"{table_name}\" does not exist"),
            )
        })?;

        let projection = project(table, &caps[1])?;
        let limit = LIMIT
            .captures(&caps[3])
            .and_then(|c| c[1].parse::<usize>().ok())
            .unwrap_or(usize::MAX);

        let rows = table
            .rows
            .iter()
            .take(limit)
            .map(|row| projection.iter().map(|&i| row.get(i).cloned().unwrap_or(Value::Null)).collect())
            .collect();
        let columns = projection.iter().map(|&i| table.columns[i].clone()).collect();

        Ok(Fetched::from_rows(columns, rows))
    }
}

/// Resolves a select list to column positions.
fn project(table: &MockTable, select_list: &str) -> Result<Vec<usize>> {
    if select_list.trim() == "*" {
        return Ok((0..table.columns.len()).collect());
    }

    select_list
        .split(',')
        .map(|name| {
            let name = name.trim().to_lowercase();
            table
                .columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&name))
                .ok_or_else(|| {
                    GateError::store(Some("42703"), format!("column \"{name}\" does not exist"))
                })
        })
        .collect()
}
