//! Command-line argument parsing for querygate.

use clap::{Parser, Subcommand};
use querygate::config::Config;
use std::path::PathBuf;

/// Guarded read-only query and analysis gateway.
#[derive(Parser, Debug)]
#[command(name = "querygate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH", env = "QUERYGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Use the in-memory mock store instead of configured environments
    #[arg(long, global = true)]
    pub mock_db: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List configured environments
    Envs,

    /// Check connectivity of one or all environments
    Probe {
        /// Environment to probe (all when omitted)
        environment: Option<String>,
    },

    /// Run a read-only, bounded SQL statement
    Query {
        /// SQL statement (must start with SELECT, WITH, or EXPLAIN and contain LIMIT)
        sql: String,

        /// Environment to run against (default environment when omitted)
        #[arg(short, long, value_name = "NAME")]
        env: Option<String>,

        /// Maximum rows to return
        #[arg(long, value_name = "N")]
        cap: Option<usize>,
    },

    /// Run a statement and evaluate analysis code over its rows
    Analyze {
        /// SQL statement
        sql: String,

        /// Analysis code; `data` holds the rows
        code: String,

        /// Environment to run against (default environment when omitted)
        #[arg(short, long, value_name = "NAME")]
        env: Option<String>,

        /// Maximum rows fetched for analysis
        #[arg(long, value_name = "N")]
        cap: Option<usize>,
    },

    /// Serve newline-delimited JSON tool calls on stdin/stdout
    Serve,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Fallback log filter for this invocation.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "querygate=debug,info"
        } else {
            querygate::logging::DEFAULT_FILTER
        }
    }
}
