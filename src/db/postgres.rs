//! PostgreSQL store implementation.
//!
//! Provides `PgStore`, a `StorePool` over a sqlx `PgPool`. Every session is
//! opened with `default_transaction_read_only = on`, so the store itself
//! refuses writes even if a statement slips past the query guard.

use crate::db::{map_sqlx_error, DatabaseBackend, Fetched, Lease, PoolSettings, PoolStats, Record};
use crate::db::{StoreConnection, StorePool};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgColumn, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgTypeKind};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, Decode, Executor, Postgres, Row, Statement, Type, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::debug;

/// PostgreSQL connection pool for one environment.
#[derive(Debug)]
pub struct PgStore {
    label: String,
    pool: PgPool,
}

impl PgStore {
    /// Creates a pool that opens connections on first use.
    pub fn connect_lazy(label: &str, url: &str, settings: PoolSettings) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| GateError::config(format!("Invalid connection string for '{label}': {e}")))?
            .options([("default_transaction_read_only", "on")]);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_lazy_with(options);

        debug!(environment = label, "Created lazy PostgreSQL pool");
        Ok(Self::from_pool(label, pool))
    }

    /// Wraps an existing pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(label: &str, pool: PgPool) -> Self {
        Self {
            label: label.to_string(),
            pool,
        }
    }
}

#[async_trait]
impl StorePool for PgStore {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn acquire(&self) -> Result<Lease> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error(&self.label, e))?;
        Ok(Lease::new(Box::new(PgConnection {
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

struct PgConnection {
    label: String,
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl StoreConnection for PgConnection {
    async fn fetch_all(&mut self, sql: &str) -> Result<Fetched> {
        let rows: Vec<PgRow> = sqlx::query(sql)
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

/// Converts a sqlx PgRow to a JSON record.
fn convert_row(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), convert_value(row, col)))
        .collect()
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

/// Decodes a one-dimensional array, keeping null elements.
fn get_array<'r, T>(row: &'r PgRow, index: usize, to_json: impl Fn(T) -> Value) -> Option<Value>
where
    Vec<Option<T>>: Decode<'r, Postgres> + Type<Postgres>,
{
    get::<Vec<Option<T>>>(row, index).map(|items| {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.map(&to_json).unwrap_or(Value::Null))
                .collect(),
        )
    })
}

/// Converts a single column value to JSON based on its PostgreSQL type.
///
/// Values of types without a decoder here come back as an
/// `"<unsupported TYPE>"` placeholder, never as null.
fn convert_value(row: &PgRow, column: &PgColumn) -> Value {
    let index = column.ordinal();
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let type_info = column.type_info();
    let value = match type_info.name() {
        "BOOL" => get::<bool>(row, index).map(Value::Bool),
        "INT2" => get::<i16>(row, index).map(Value::from),
        "INT4" => get::<i32>(row, index).map(Value::from),
        "INT8" => get::<i64>(row, index).map(Value::from),
        "FLOAT4" => get::<f32>(row, index).map(|v| Value::from(f64::from(v))),
        "FLOAT8" => get::<f64>(row, index).map(Value::from),
        "NUMERIC" => get::<Decimal>(row, index).map(numeric_to_json),
        "JSON" | "JSONB" => get::<Value>(row, index),
        "UUID" => get::<Uuid>(row, index).map(|v| Value::String(v.to_string())),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, index).map(|v| Value::String(v.to_rfc3339())),
        "TIMESTAMP" => get::<NaiveDateTime>(row, index).map(|v| Value::String(v.to_string())),
        "DATE" => get::<NaiveDate>(row, index).map(|v| Value::String(v.to_string())),
        "TIME" => get::<NaiveTime>(row, index).map(|v| Value::String(v.to_string())),
        "INTERVAL" => get::<PgInterval>(row, index).map(|v| Value::String(interval_to_iso(&v))),
        "BYTEA" => get::<Vec<u8>>(row, index)
            .map(|v| Value::String(base64::engine::general_purpose::STANDARD.encode(v))),
        "BOOL[]" => get_array::<bool>(row, index, Value::Bool),
        "INT2[]" => get_array::<i16>(row, index, Value::from),
        "INT4[]" => get_array::<i32>(row, index, Value::from),
        "INT8[]" => get_array::<i64>(row, index, Value::from),
        "FLOAT4[]" => get_array::<f32>(row, index, |v| Value::from(f64::from(v))),
        "FLOAT8[]" => get_array::<f64>(row, index, Value::from),
        "NUMERIC[]" => get_array::<Decimal>(row, index, numeric_to_json),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => get_array::<String>(row, index, Value::String),
        "UUID[]" => get_array::<Uuid>(row, index, |v| Value::String(v.to_string())),
        "JSON[]" | "JSONB[]" => get_array::<Value>(row, index, |v| v),
        // Enum values travel as their label text.
        _ if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
            row.try_get_unchecked::<String, _>(index).ok().map(Value::String)
        }
        _ => get::<String>(row, index).map(Value::String),
    };
    value.unwrap_or_else(|| Value::String(format!("<unsupported {}>", type_info.name())))
}

/// NUMERIC as a JSON number when `f64` holds it exactly, otherwise as its
/// decimal text.
fn numeric_to_json(value: Decimal) -> Value {
    let normalized = value.normalize();
    if normalized.scale() == 0 {
        if let Some(int) = normalized.to_i64() {
            return Value::from(int);
        }
    }
    normalized
        .to_f64()
        .filter(|float| Decimal::from_f64(*float).map(|d| d.normalize()) == Some(normalized))
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(normalized.to_string()))
}

/// ISO 8601 duration, e.g. `P1M2DT3.5S`.
fn interval_to_iso(interval: &PgInterval) -> String {
    let mut out = String::from("P");
    if interval.months != 0 {
        out.push_str(&format!("{}M", interval.months));
    }
    if interval.days != 0 {
        out.push_str(&format!("{}D", interval.days));
    }
    if interval.microseconds != 0 || out.len() == 1 {
        let seconds = Decimal::new(interval.microseconds, 6).normalize();
        out.push_str(&format!("T{seconds}S"));
    }
    out
}
