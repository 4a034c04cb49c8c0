//! Database access layer.
//!
//! - `backend`: driver traits every backing store implements
//! - `sqlx_backend`: the MySQL/PostgreSQL/SQLite driver built on sqlx
//! - `pool`: bounded connection pool with RAII leases
//! - `executor` / `stream`: run a query to completion or as a row stream
//! - `transaction`: begin/commit/rollback/close on a caller-held connection
//! - `prepare`: structured statements to query text plus arguments

pub mod backend;
pub mod connection;
pub mod executor;
mod params;
pub mod pool;
pub mod prepare;
pub mod sqlx_backend;
pub mod stream;
pub mod transaction;
pub mod types;

pub use backend::{Backend, NativeConnection};
pub use connection::Connection;
pub use executor::QueryExecutor;
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use prepare::{DefaultPreparer, PlaceholderStyle, StatementPreparer};
pub use sqlx_backend::{DbConnection, SqlxBackend};
pub use stream::{QueryStreamer, RowStream, StreamState};
