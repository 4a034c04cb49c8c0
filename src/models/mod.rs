//! Data models for dblink.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod statement;

// Re-export commonly used types
pub use connection::{DatabaseType, Ownership};
pub use query::{NativeResult, QueryParam, ResultSet, Row};
pub use statement::{PreparedQuery, Statement, StatementParams, Statements};
