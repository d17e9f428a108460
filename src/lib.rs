//! querygate - a guarded, read-only query and analysis gateway.
//!
//! Callers submit SQL (and optionally analysis code) against named
//! environments. Statements are classified before any connection is leased,
//! results are capped, and analysis runs in a sandboxed evaluator with a
//! step budget and a wall-clock deadline.

pub mod analysis;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod guard;
pub mod logging;
pub mod registry;
pub mod shaper;
pub mod tools;
