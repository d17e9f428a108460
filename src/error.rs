//! Error types for querygate.
//!
//! Defines the main error enum used throughout the engine, plus the fixed
//! lookup that turns raw store error codes into descriptive categories.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Main error type for querygate operations.
#[derive(Error, Debug, Clone)]
pub enum GateError {
    /// The requested environment is not registered.
    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    /// Every connection in the pool stayed leased past the acquire timeout.
    #[error("Connection pool for '{environment}' is exhausted")]
    PoolExhausted { environment: String },

    /// Opening a new connection to the store timed out.
    #[error("Connecting to '{environment}' timed out")]
    ConnectTimeout { environment: String },

    /// Any other connectivity failure (refused, TLS, auth handshake, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store rejected or failed the statement.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Configuration errors (invalid config file, bad connection string, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a store error, classifying `code` through the fixed table.
    pub fn store(code: Option<&str>, msg: impl Into<String>) -> Self {
        Self::Store(StoreError::classify(code, msg))
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownEnvironment(_) => "Unknown Environment",
            Self::PoolExhausted { .. } | Self::ConnectTimeout { .. } | Self::Connection(_) => {
                "Connection Error"
            }
            Self::Store(e) => e.category.label(),
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true for failures reaching the store at all.
    ///
    /// These are never retried automatically.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::ConnectTimeout { .. } | Self::Connection(_)
        )
    }
}

/// Descriptive category for a store-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorCategory {
    MissingRelation,
    MissingColumn,
    SyntaxError,
    AuthFailure,
    UniqueViolation,
    ForeignKeyViolation,
    Unknown,
}

impl StoreErrorCategory {
    /// Looks up a store error code in the fixed code table.
    ///
    /// PostgreSQL SQLSTATEs and SQLite extended result codes share the table;
    /// anything unmapped is `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "42P01" => Self::MissingRelation,
            "42703" => Self::MissingColumn,
            "42601" => Self::SyntaxError,
            "28P01" | "28000" => Self::AuthFailure,
            "23505" | "2067" | "1555" => Self::UniqueViolation,
            "23503" | "787" => Self::ForeignKeyViolation,
            _ => Self::Unknown,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingRelation => "Missing Relation",
            Self::MissingColumn => "Missing Column",
            Self::SyntaxError => "Syntax Error",
            Self::AuthFailure => "Authentication Failure",
            Self::UniqueViolation => "Unique Violation",
            Self::ForeignKeyViolation => "Foreign Key Violation",
            Self::Unknown => "Store Error",
        }
    }
}

/// A classified store failure. The raw code is kept even when unmapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreError {
    pub category: StoreErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    /// Classifies a raw code and message.
    pub fn classify(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let category = match code {
            // SQLITE_ERROR covers several distinct failures.
            Some("1") => refine_sqlite_generic(&message),
            Some(code) => StoreErrorCategory::from_code(code),
            None => StoreErrorCategory::Unknown,
        };
        Self {
            category,
            code: code.map(str::to_string),
            message,
        }
    }
}

fn refine_sqlite_generic(message: &str) -> StoreErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("no such table") {
        StoreErrorCategory::MissingRelation
    } else if lower.contains("no such column") {
        StoreErrorCategory::MissingColumn
    } else if lower.contains("syntax error") {
        StoreErrorCategory::SyntaxError
    } else {
        StoreErrorCategory::Unknown
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} [{}]: {}", self.category.label(), code, self.message),
            None => write!(f, "{}: {}", self.category.label(), self.message),
        }
    }
}

/// Result type alias using GateError.
pub type Result<T> = std::result::Result<T, GateError>;
