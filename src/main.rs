//! querygate - guarded read-only query and analysis gateway.

mod cli;

use anyhow::Context;
use cli::{Cli, Command};
use querygate::config::Config;
use querygate::db::MockStore;
use querygate::engine::ExecutionEngine;
use querygate::error::GateError;
use querygate::registry::{Environment, EnvironmentRegistry};
use querygate::{logging, tools};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

/// Rows seeded into the mock store's `users` table.
const MOCK_USERS: i64 = 100;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();
    logging::init_stderr_logging_with(cli.log_filter());

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            match e.downcast_ref::<GateError>() {
                Some(gate) => error!("{}: {}", gate.category(), gate),
                None => error!("{e:#}"),
            }
            std::process::exit(1);
        }
    }
}

/// Runs one command. Returns `false` when the command completed but its
/// result was a rejection or failure.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let registry = Arc::new(build_registry(&cli)?);
    let engine = ExecutionEngine::new(Arc::clone(&registry));

    let ok = match cli.command {
        Command::Envs => {
            print_json(&registry.list())?;
            true
        }
        Command::Probe { environment } => {
            let reports = match environment {
                Some(name) => vec![registry.probe(&name).await?],
                None => registry.probe_all().await,
            };
            print_json(&reports)?;
            reports.iter().all(|r| r.healthy)
        }
        Command::Query { sql, env, cap } => {
            let result = engine.run_query(env.as_deref(), &sql, cap).await;
            print_json(&result.to_json())?;
            result.is_success()
        }
        Command::Analyze {
            sql,
            code,
            env,
            cap,
        } => {
            let result = engine.run_analysis(env.as_deref(), &sql, &code, cap).await;
            print_json(&result.to_json())?;
            result.is_success()
        }
        Command::Serve => {
            info!("Serving tool calls on stdin");
            let stdin = BufReader::new(tokio::io::stdin());
            tools::serve(&engine, stdin, tokio::io::stdout()).await?;
            true
        }
    };

    registry.close().await;
    Ok(ok)
}

/// Builds the registry from the config file and environment, or a single
/// mock environment when `--mock-db` is set.
fn build_registry(cli: &Cli) -> anyhow::Result<EnvironmentRegistry> {
    if cli.mock_db {
        info!("Using mock store");
        let store = MockStore::new("mock", querygate::db::DEFAULT_MAX_CONNECTIONS)
            .with_users(MOCK_USERS);
        let env = Environment::new("mock", Arc::new(store));
        return Ok(EnvironmentRegistry::new(vec![env], "mock")?);
    }

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    config.apply_env_overrides();
    config.validate()?;

    EnvironmentRegistry::from_config(&config)
        .with_context(|| format!("Failed to build environments from {}", config_path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{text}");
    Ok(())
}
