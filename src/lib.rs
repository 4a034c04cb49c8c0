//! dblink - database access adapter.
//!
//! A uniform contract over PostgreSQL, MySQL and SQLite for acquiring
//! connections (pooled or caller-held), executing parameterized queries,
//! streaming result rows and driving transactions. Every pooled connection is
//! returned exactly once, whether the work succeeds, fails, or the consumer
//! stops reading a stream early.

pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod models;

pub use config::{Config, ConnectionConfig, PoolOptions};
pub use db::{Connection, PoolStats, RowStream, StatementPreparer};
pub use error::{DbError, DbResult};
pub use handler::Handler;
