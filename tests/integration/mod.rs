//! Integration tests for querygate.

pub mod config_test;
pub mod engine_test;
pub mod postgres_test;
pub mod sqlite_test;
pub mod tools_test;
