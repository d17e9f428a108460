//! Logging configuration for querygate.
//!
//! Logs always go to stderr. Stdout belongs to command output and, in
//! `serve` mode, to the tool-response stream.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Builds the log filter: `RUST_LOG` if set and valid, otherwise `fallback`.
pub fn build_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Initializes logging to stderr at the default level.
pub fn init_stderr_logging() {
    init_stderr_logging_with(DEFAULT_FILTER);
}

/// Initializes logging to stderr with a custom fallback filter.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_stderr_logging_with(fallback: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(fallback))
        .with_writer(std::io::stderr)
        .try_init();
}
