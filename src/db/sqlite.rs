//! SQLite store implementation.
//!
//! Connections are opened read-only (`SQLITE_OPEN_READONLY`), mirroring the
//! read-only sessions used for PostgreSQL.

use crate::db::{map_sqlx_error, DatabaseBackend, Fetched, Lease, PoolSettings, PoolStats, Record};
use crate::db::{StoreConnection, StorePool};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Decode, Executor, Row, Sqlite, Statement, Type, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::debug;

/// SQLite connection pool for one environment.
#[derive(Debug)]
pub struct SqliteStore {
    label: String,
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates a read-only pool that opens connections on first use.
    pub fn connect_lazy(label: &str, url: &str, settings: PoolSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| GateError::config(format!("Invalid connection string for '{label}': {e}")))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_lazy_with(options);

        debug!(environment = label, "Created lazy SQLite pool");
        Ok(Self::from_pool(label, pool))
    }

    /// Wraps an existing pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(label: &str, pool: SqlitePool) -> Self {
        Self {
            label: label.to_string(),
            pool,
        }
    }
}

#[async_trait]
impl StorePool for SqliteStore {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Sqlite
    }

    async fn acquire(&self) -> Result<Lease> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error(&self.label, e))?;
        Ok(Lease::new(Box::new(SqliteConnection {
            label: self.label.clone(),
            conn,
        })))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct SqliteConnection {
    label: String,
    conn: PoolConnection<Sqlite>,
}

#[async_trait]
impl StoreConnection for SqliteConnection {
    async fn fetch_all(&mut self, sql: &str) -> Result<Fetched> {
        let rows: Vec<SqliteRow> = sqlx::query(sql)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error(&self.label, e))?;

        let columns = match rows.first() {
            Some(row) => column_names(row.columns()),
            // No row to read names from; ask the prepared statement instead.
            None => {
                let statement = (&mut *self.conn)
                    .prepare(sql)
                    .await
                    .map_err(|e| map_sqlx_error(&self.label, e))?;
                column_names(statement.columns())
            }
        };
        let records = rows.iter().map(convert_row).collect();

        Ok(Fetched { columns, records })
    }
}

fn column_names<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

fn convert_row(row: &SqliteRow) -> Record {
    row.columns()
        .iter()
        .map(|col| {
            let value = convert_value(row, col.ordinal(), col.type_info().name());
            (col.name().to_string(), value)
        })
        .collect()
}

fn get<'r, T>(row: &'r SqliteRow, index: usize) -> Option<T>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

/// SQLite is dynamically typed: the declared type is only a hint, so decode by
/// the storage class of the value itself.
fn convert_value(row: &SqliteRow, index: usize, declared: &str) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let value = match (declared, storage.as_str()) {
        ("BOOLEAN", _) => get::<bool>(row, index).map(Value::Bool),
        (_, "INTEGER") => get::<i64>(row, index).map(Value::from),
        (_, "REAL") => get::<f64>(row, index).map(Value::from),
        (_, "BLOB") => get::<Vec<u8>>(row, index)
            .map(|v| Value::String(base64::engine::general_purpose::STANDARD.encode(v))),
        _ => get::<String>(row, index).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreErrorCategory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn seeded_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.db");
        let url = format!("sqlite://{}", path.display());

        let writable = SqlitePool::connect_with(
            SqliteConnectOptions::from_str(&url)
                .unwrap()
                .create_if_missing(true),
        )
        .await
        .unwrap();
        sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL, data BLOB)")
            .execute(&writable)
            .await
            .unwrap();
        sqlx::query("INSERT INTO items VALUES (1, 'pen', 1.5, x'0102'), (2, NULL, 3.0, NULL)")
            .execute(&writable)
            .await
            .unwrap();
        writable.close().await;

        let store = SqliteStore::connect_lazy("local", &url, PoolSettings::default()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_decodes_storage_classes() {
        let (_dir, store) = seeded_store().await;
        let mut lease = store.acquire().await.unwrap();

        let fetched = lease
            .fetch_all("SELECT id, name, price, data FROM items ORDER BY id LIMIT 10")
            .await
            .unwrap();

        assert_eq!(fetched.columns, vec!["id", "name", "price", "data"]);
        assert_eq!(fetched.records[0]["id"], json!(1));
        assert_eq!(fetched.records[0]["name"], json!("pen"));
        assert_eq!(fetched.records[0]["price"], json!(1.5));
        assert_eq!(fetched.records[0]["data"], json!("AQI="));
        assert_eq!(fetched.records[1]["name"], Value::Null);
    }

    #[tokio::test]
    async fn test_empty_result_keeps_column_names() {
        let (_dir, store) = seeded_store().await;
        let mut lease = store.acquire().await.unwrap();

        let fetched = lease
            .fetch_all("SELECT id, name AS label FROM items WHERE id > 100 LIMIT 10")
            .await
            .unwrap();

        assert!(fetched.is_empty());
        assert_eq!(fetched.columns, vec!["id", "label"]);
    }

    #[tokio::test]
    async fn test_writes_are_refused() {
        let (_dir, store) = seeded_store().await;
        let mut lease = store.acquire().await.unwrap();

        let result = lease.fetch_all("DELETE FROM items").await;
        assert!(matches!(result, Err(GateError::Store(_))));

        let fetched = lease.fetch_all("SELECT id FROM items LIMIT 5").await.unwrap();
        assert_eq!(fetched.records.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_table_is_classified() {
        let (_dir, store) = seeded_store().await;
        let mut lease = store.acquire().await.unwrap();

        match lease.fetch_all("SELECT * FROM nope LIMIT 1").await {
            Err(GateError::Store(err)) => {
                assert_eq!(err.category, StoreErrorCategory::MissingRelation);
            }
            other => panic!("Expected store error, got {other:?}"),
        }
    }
}
