//! Row streaming with connection release tied to stream termination.
//!
//! A [`RowStream`] is bound to one connection for its whole life. For a pooled
//! connection the stream owns the lease, and the lease goes back to the pool
//! when the stream closes. Closing happens in exactly one of three ways:
//!
//! - the rows run out: the end handler marks the stream `Ended` and closes it;
//! - the backend yields an error: the stream closes, then hands out the error;
//! - the consumer calls [`RowStream::close`] or drops the stream.
//!
//! Closing drops the inner row source, which drops the lease it owns. The source
//! is held in an `Option` and taken on close, so the release cannot run twice.
//! A caller-supplied connection is only borrowed and is never released here.

use crate::db::connection::Connection;
use crate::db::pool::ConnectionPool;
use crate::db::prepare::StatementPreparer;
use crate::error::DbResult;
use crate::models::{Ownership, QueryParam, Row, Statements};
use async_stream::stream;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Lifecycle of a [`RowStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Rows may still arrive.
    Open,
    /// Reached end of data; the connection has been given back.
    Ended,
    /// Closed before the end (explicitly, by drop, or on error).
    Closed,
}

/// A lazy, single-pass sequence of rows.
pub struct RowStream<'c> {
    connection_id: String,
    ownership: Ownership,
    rows: Option<BoxStream<'c, DbResult<Row>>>,
    state: StreamState,
    delivered: u64,
}

impl<'c> RowStream<'c> {
    fn new(connection_id: String, ownership: Ownership, rows: BoxStream<'c, DbResult<Row>>) -> Self {
        debug!(connection_id = %connection_id, ownership = ?ownership, "Row stream opened");
        Self {
            connection_id,
            ownership,
            rows: Some(rows),
            state: StreamState::Open,
            delivered: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Rows handed to the consumer so far.
    pub fn rows_delivered(&self) -> u64 {
        self.delivered
    }

    /// Stop the stream and give back its connection. Idempotent.
    pub fn close(&mut self) {
        if self.state == StreamState::Open {
            self.state = StreamState::Closed;
        }
        self.release();
    }

    fn on_end(&mut self) {
        self.state = StreamState::Ended;
        debug!(
            connection_id = %self.connection_id,
            rows = self.delivered,
            "Row stream reached end of data"
        );
        self.release();
    }

    /// The one place the connection is let go.
    fn release(&mut self) {
        if let Some(rows) = self.rows.take() {
            drop(rows);
            debug!(
                connection_id = %self.connection_id,
                ownership = ?self.ownership,
                state = ?self.state,
                rows = self.delivered,
                "Row stream closed"
            );
        }
    }
}

impl Stream for RowStream<'_> {
    type Item = DbResult<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(rows) = this.rows.as_mut() else {
            return Poll::Ready(None);
        };

        match rows.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(row))) => {
                this.delivered += 1;
                Poll::Ready(Some(Ok(row)))
            }
            Poll::Ready(Some(Err(e))) => {
                // Release first so the error reaches the consumer with nothing owed
                this.close();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.on_end();
                Poll::Ready(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.rows {
            Some(rows) => rows.size_hint(),
            None => (0, Some(0)),
        }
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        if self.rows.is_some() {
            if self.ownership == Ownership::Pool {
                warn!(
                    connection_id = %self.connection_id,
                    rows = self.delivered,
                    "Row stream dropped while open, releasing pooled connection"
                );
            }
            self.close();
        }
    }
}

impl std::fmt::Debug for RowStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("connection_id", &self.connection_id)
            .field("ownership", &self.ownership)
            .field("state", &self.state)
            .field("delivered", &self.delivered)
            .finish()
    }
}

/// Opens row streams against a pool or a caller-held connection.
#[derive(Debug, Clone)]
pub struct QueryStreamer {
    pool: Arc<ConnectionPool>,
}

impl QueryStreamer {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Open a stream over the rows of `sql`.
    ///
    /// Without `conn`, a pooled connection is acquired now and held until the
    /// stream closes. Acquisition errors are returned here; execution errors
    /// arrive as stream items.
    pub async fn stream<'c>(
        &self,
        sql: String,
        args: Vec<QueryParam>,
        conn: Option<&'c mut Connection>,
    ) -> DbResult<RowStream<'c>> {
        match conn {
            Some(conn) => {
                let connection_id = conn.id().to_string();
                debug!(connection_id = %connection_id, sql = %sql, params = args.len(), "Streaming on caller connection");
                let rows = stream! {
                    let mut inner = conn.native_mut().open_stream(&sql, &args);
                    while let Some(item) = inner.next().await {
                        yield item;
                    }
                };
                Ok(RowStream::new(connection_id, Ownership::Caller, rows.boxed()))
            }
            None => {
                let mut lease = self.pool.acquire().await?;
                let connection_id = lease.id().to_string();
                debug!(connection_id = %connection_id, sql = %sql, params = args.len(), "Streaming on pooled connection");
                let rows = stream! {
                    match lease.native() {
                        Ok(native) => {
                            let mut inner = native.open_stream(&sql, &args);
                            while let Some(item) = inner.next().await {
                                yield item;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                        }
                    }
                };
                Ok(RowStream::new(connection_id, Ownership::Pool, rows.boxed()))
            }
        }
    }

    /// Prepare `statements` once and stream the prepared text verbatim.
    pub async fn stream_statement<'c>(
        &self,
        preparer: &dyn StatementPreparer,
        statements: &Statements,
        conn: Option<&'c mut Connection>,
    ) -> DbResult<RowStream<'c>> {
        let prepared = preparer.prepare(statements)?;
        self.stream(prepared.query, prepared.args, conn).await
    }
}
