//! Environment registry for querygate.
//!
//! Holds the named connection pools created at startup and the active
//! selection. Environments are never added or removed at runtime, only
//! selected. Calls capture an `Arc<Environment>` once through [`resolve`]
//! and keep it for their lifetime, so a concurrent `select` cannot move an
//! in-flight call to a different environment.
//!
//! [`resolve`]: EnvironmentRegistry::resolve

mod selection;

pub use selection::SelectionState;

use crate::config::{redact_url, Config};
use crate::db::{self, DatabaseBackend, PoolSettings, PoolStats, StorePool};
use crate::error::{GateError, Result};
use selection::SelectionCommand;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// How long an explicit selection lasts before reverting to the default.
pub const REVERT_DWELL: Duration = Duration::from_secs(10 * 60);

/// Trivial statement used for liveness probes.
const PROBE_SQL: &str = "SELECT 1";

/// A named pool representing one backing database target.
pub struct Environment {
    name: String,
    target: String,
    pool: Arc<dyn StorePool>,
}

impl Environment {
    /// Wraps an existing pool.
    pub fn new(name: impl Into<String>, pool: Arc<dyn StorePool>) -> Self {
        let name = name.into();
        Self {
            target: format!("{} pool", pool.backend()),
            name,
            pool,
        }
    }

    /// Creates a lazily-connecting pool for `url`.
    pub fn connect(name: &str, url: &str, settings: PoolSettings) -> Result<Self> {
        let pool = db::connect_pool(name, url, settings)?;
        Ok(Self {
            name: name.to_string(),
            target: redact_url(url),
            pool,
        })
    }

    /// Environment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display-safe description of the target (no password).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The environment's pool.
    pub fn pool(&self) -> &Arc<dyn StorePool> {
        &self.pool
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("backend", &self.pool.backend())
            .finish()
    }
}

/// Listing entry for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentInfo {
    pub name: String,
    pub backend: DatabaseBackend,
    pub target: String,
    pub active: bool,
    pub default: bool,
    pub pool: PoolStats,
}

/// Outcome of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub environment: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Named connection pools plus the active selection.
pub struct EnvironmentRegistry {
    environments: BTreeMap<String, Arc<Environment>>,
    default: String,
    dwell: Duration,
    commands: mpsc::Sender<SelectionCommand>,
    state: watch::Receiver<SelectionState>,
}

impl EnvironmentRegistry {
    /// Creates a registry with the standard dwell window.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(environments: Vec<Environment>, default: &str) -> Result<Self> {
        Self::with_dwell(environments, default, REVERT_DWELL)
    }

    /// Creates a registry with a custom dwell window.
    pub fn with_dwell(
        environments: Vec<Environment>,
        default: &str,
        dwell: Duration,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for env in environments {
            let name = env.name.clone();
            if map.insert(name.clone(), Arc::new(env)).is_some() {
                return Err(GateError::config(format!(
                    "Environment '{name}' is defined more than once"
                )));
            }
        }

        if !map.contains_key(default) {
            return Err(GateError::config(format!(
                "Default environment '{default}' is not defined"
            )));
        }

        let (commands, state) = selection::spawn(default, dwell);
        info!(
            environments = map.len(),
            default = default,
            "Environment registry ready"
        );

        Ok(Self {
            environments: map,
            default: default.to_string(),
            dwell,
            commands,
            state,
        })
    }

    /// Builds every configured environment's pool.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = config.pool.settings();
        let environments = config
            .environments
            .iter()
            .map(|(name, url)| Environment::connect(name, url, settings))
            .collect::<Result<Vec<_>>>()?;
        let default = config.default_environment()?;
        Self::new(environments, &default)
    }

    /// Makes `name` the active environment and (re)starts the revert countdown.
    ///
    /// Fails with `UnknownEnvironment`, leaving the selection unchanged, if
    /// `name` is not registered.
    pub async fn select(&self, name: &str) -> Result<()> {
        if !self.environments.contains_key(name) {
            warn!(environment = name, "Select of unknown environment");
            return Err(GateError::UnknownEnvironment(name.to_string()));
        }

        let (reply, done) = oneshot::channel();
        self.commands
            .send(SelectionCommand::Select {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| GateError::internal("Selection actor is not running"))?;
        done.await
            .map_err(|_| GateError::internal("Selection actor dropped the request"))
    }

    /// Name of the active environment. No side effects.
    pub fn current(&self) -> String {
        self.state.borrow().active.clone()
    }

    /// Snapshot of the selection, including any pending revert.
    pub fn selection(&self) -> SelectionState {
        self.state.borrow().clone()
    }

    /// Name of the designated default environment.
    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Configured dwell window.
    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Looks up a registered environment.
    pub fn get(&self, name: &str) -> Result<Arc<Environment>> {
        self.environments
            .get(name)
            .cloned()
            .ok_or_else(|| GateError::UnknownEnvironment(name.to_string()))
    }

    /// Captures the environment a call will use for its whole lifetime.
    ///
    /// `None` means the active environment at the moment of the call.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<Environment>> {
        match name {
            Some(name) => self.get(name),
            None => self.get(&self.current()),
        }
    }

    /// Lists every environment in name order.
    pub fn list(&self) -> Vec<EnvironmentInfo> {
        let current = self.current();
        self.environments
            .values()
            .map(|env| EnvironmentInfo {
                name: env.name.clone(),
                backend: env.pool.backend(),
                target: env.target.clone(),
                active: env.name == current,
                default: env.name == self.default,
                pool: env.pool.stats(),
            })
            .collect()
    }

    /// Runs a trivial statement against `name` without touching the selection.
    pub async fn probe(&self, name: &str) -> Result<ProbeReport> {
        let env = self.get(name)?;
        Ok(probe_environment(&env).await)
    }

    /// Probes every environment concurrently.
    pub async fn probe_all(&self) -> Vec<ProbeReport> {
        futures::future::join_all(self.environments.values().map(|env| probe_environment(env)))
            .await
    }

    /// Closes every pool.
    pub async fn close(&self) {
        for env in self.environments.values() {
            env.pool.close().await;
        }
    }
}

async fn probe_environment(env: &Environment) -> ProbeReport {
    let start = Instant::now();
    let result = match env.pool.acquire().await {
        Ok(mut lease) => lease.fetch_all(PROBE_SQL).await.map(|_| ()),
        Err(e) => Err(e),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            debug!(environment = %env.name, latency_ms, "Probe succeeded");
            ProbeReport {
                environment: env.name.clone(),
                healthy: true,
                latency_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!(environment = %env.name, error = %e, "Probe failed");
            ProbeReport {
                environment: env.name.clone(),
                healthy: false,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}
