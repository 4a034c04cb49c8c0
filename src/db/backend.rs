//! Backing-store driver abstraction.
//!
//! The adapter only talks to a database through these two traits. A [`Backend`]
//! opens sessions; a [`NativeConnection`] is one open session exposing the
//! execute/stream/transaction primitives. Each supported store is one
//! implementation (see [`SqlxBackend`](super::SqlxBackend)); the pool and the
//! engines never look past the trait objects.

use crate::error::DbResult;
use crate::models::{NativeResult, QueryParam, Row};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// One open session with the backing store.
#[async_trait]
pub trait NativeConnection: Send {
    /// Run a statement to completion.
    async fn execute(&mut self, sql: &str, args: &[QueryParam]) -> DbResult<NativeResult>;

    /// Run a statement and yield its rows as they arrive.
    ///
    /// The returned stream borrows the connection; dropping it abandons the cursor.
    fn open_stream<'a>(
        &'a mut self,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> BoxStream<'a, DbResult<Row>>;

    /// Start a transaction.
    ///
    /// No-op for stores that open a transaction implicitly on the first statement.
    async fn begin(&mut self) -> DbResult<()> {
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Check the session is still usable.
    async fn ping(&mut self) -> DbResult<()> {
        Ok(())
    }

    /// Close the session gracefully.
    async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Factory for sessions with one backing store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs, e.g. "PostgreSQL".
    fn name(&self) -> &str;

    /// Open a new session.
    async fn connect(&self) -> DbResult<Box<dyn NativeConnection>>;
}
