//! Guarded query and analysis execution.
//!
//! This module ties the guards, the registry, the store layer, the shaper
//! and the analysis evaluator together behind two entry points.

pub mod executor;

pub use executor::{AnalysisOutcome, ExecutionEngine, ExecutionResult, QueryOutcome};
