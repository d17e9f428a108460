//! Store abstraction layer for querygate.
//!
//! Provides a trait-based interface over connection pools, allowing
//! different database backends to be registered as environments. A pool hands
//! out [`Lease`]s; dropping a lease is the only way a connection goes back to
//! its pool, so release happens on every exit path.

mod mock;
mod postgres;
mod sqlite;
mod types;

pub use mock::MockStore;
pub use postgres::PgStore;
pub use sqlite::SqliteStore;
pub use types::{Fetched, PoolStats, Record};

use crate::error::{GateError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default maximum number of connections per environment pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default time to wait for a free connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Sqlite,
    Mock,
}

impl DatabaseBackend {
    /// Returns the backend as a string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Mock => "mock",
        }
    }

    /// Detects the backend from a connection string scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool sizing and wait policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// A single leased connection.
#[async_trait]
pub trait StoreConnection: Send {
    /// Executes `sql` verbatim and returns every row it produced.
    async fn fetch_all(&mut self, sql: &str) -> Result<Fetched>;
}

/// A named, bounded pool of store connections.
#[async_trait]
pub trait StorePool: Send + Sync {
    /// Backend kind behind this pool.
    fn backend(&self) -> DatabaseBackend;

    /// Waits (bounded) for a free connection.
    async fn acquire(&self) -> Result<Lease>;

    /// Current occupancy.
    fn stats(&self) -> PoolStats;

    /// Closes every connection; subsequent acquires fail.
    async fn close(&self);
}

/// An exclusively held connection. Dropping it returns the connection.
pub struct Lease {
    conn: Box<dyn StoreConnection>,
    acquired_at: Instant,
}

impl Lease {
    /// Wraps a backend connection.
    pub fn new(conn: Box<dyn StoreConnection>) -> Self {
        Self {
            conn,
            acquired_at: Instant::now(),
        }
    }

    /// Executes `sql` on the leased connection.
    pub async fn fetch_all(&mut self, sql: &str) -> Result<Fetched> {
        self.conn.fetch_all(sql).await
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        debug!(held = ?self.acquired_at.elapsed(), "Connection released");
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

/// Creates a lazily-connecting pool for the given connection string.
///
/// This is the central factory for environment pools. No connection is opened
/// here, so an unreachable target surfaces through `probe` instead of
/// failing startup.
pub fn connect_pool(label: &str, url: &str, settings: PoolSettings) -> Result<Arc<dyn StorePool>> {
    let backend = DatabaseBackend::from_url(url).ok_or_else(|| {
        GateError::config(format!(
            "Unsupported connection string for '{label}'. Expected postgres:// or sqlite:"
        ))
    })?;

    match backend {
        DatabaseBackend::Postgres => Ok(Arc::new(PgStore::connect_lazy(label, url, settings)?)),
        DatabaseBackend::Sqlite => Ok(Arc::new(SqliteStore::connect_lazy(label, url, settings)?)),
        DatabaseBackend::Mock => Err(GateError::internal("Mock stores are built in code")),
    }
}

/// Maps driver errors to the engine taxonomy.
pub(crate) fn map_sqlx_error(label: &str, error: sqlx::Error) -> GateError {
    match error {
        sqlx::Error::Database(db_error) => {
            let code = db_error.code().map(|c| c.into_owned());
            GateError::store(code.as_deref(), db_error.message())
        }
        sqlx::Error::PoolTimedOut => GateError::PoolExhausted {
            environment: label.to_string(),
        },
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            GateError::ConnectTimeout {
                environment: label.to_string(),
            }
        }
        sqlx::Error::Io(io) => GateError::connection(format!("{label}: {io}")),
        sqlx::Error::Tls(tls) => GateError::connection(format!("{label}: TLS error: {tls}")),
        sqlx::Error::PoolClosed => GateError::connection(format!("{label}: pool is closed")),
        sqlx::Error::Configuration(cfg) => {
            GateError::config(format!("{label}: invalid connection settings: {cfg}"))
        }
        other => GateError::store(None, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            DatabaseBackend::from_url("postgres://localhost/db"),
            Some(DatabaseBackend::Postgres)
        );
        assert_eq!(
            DatabaseBackend::from_url("postgresql://localhost/db"),
            Some(DatabaseBackend::Postgres)
        );
        assert_eq!(
            DatabaseBackend::from_url("sqlite::memory:"),
            Some(DatabaseBackend::Sqlite)
        );
        assert_eq!(DatabaseBackend::from_url("mysql://localhost/db"), None);
    }

    #[test]
    fn test_connect_pool_rejects_unknown_scheme() {
        let result = connect_pool("x", "redis://localhost", PoolSettings::default());
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_pool_timeout_maps_to_exhausted() {
        let err = map_sqlx_error("prod", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, GateError::PoolExhausted { ref environment } if environment == "prod"));
    }

    #[test]
    fn test_io_timeout_maps_to_connect_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = map_sqlx_error("prod", sqlx::Error::Io(io));
        assert!(matches!(err, GateError::ConnectTimeout { .. }));
    }
}
