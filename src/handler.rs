//! The adapter's entry point.

use crate::config::{ConnectionConfig, PoolOptions};
use crate::db::{
    Backend, Connection, ConnectionPool, DefaultPreparer, PlaceholderStyle, PoolStats,
    QueryExecutor, QueryStreamer, RowStream, SqlxBackend, StatementPreparer, transaction,
};
use crate::error::DbResult;
use crate::models::{DatabaseType, QueryParam, ResultSet, Statements};
use std::sync::Arc;
use tracing::info;

/// Database handler owning one pool, one backend and one statement preparer.
///
/// Every operation takes an optional caller-held [`Connection`]. With one, the
/// operation runs on it and leaves the pool alone; without one, a pooled
/// connection is borrowed for the single execution or stream.
///
/// Cloning is cheap and clones share the same pool.
#[derive(Clone)]
pub struct Handler {
    pool: Arc<ConnectionPool>,
    executor: QueryExecutor,
    streamer: QueryStreamer,
    preparer: Arc<dyn StatementPreparer>,
}

impl Handler {
    /// Create a handler backed by sqlx for `config`.
    ///
    /// Fails with a configuration error if the pool cannot open its initial
    /// connections.
    pub async fn init(config: &ConnectionConfig) -> DbResult<Self> {
        let is_sqlite = config.db_type == DatabaseType::SQLite;
        let options = PoolOptions {
            max_connections: Some(config.pool_options.max_connections_or_default(is_sqlite)),
            ..config.pool_options.clone()
        };

        info!(
            database = %config.masked_connection_string(),
            db_type = %config.db_type,
            "Initializing database handler"
        );

        let backend = Arc::new(SqlxBackend::new(config.clone()));
        let handler = Self::with_backend(backend, &options).await?;
        Ok(handler.with_preparer(DefaultPreparer::for_database(config.db_type)))
    }

    /// Create a handler over any backend.
    ///
    /// Uses a [`DefaultPreparer`] with `?` placeholders until
    /// [`with_preparer`](Self::with_preparer) says otherwise.
    pub async fn with_backend(backend: Arc<dyn Backend>, options: &PoolOptions) -> DbResult<Self> {
        let pool = ConnectionPool::initialize(backend, options).await?;
        Ok(Self {
            executor: QueryExecutor::new(Arc::clone(&pool)),
            streamer: QueryStreamer::new(Arc::clone(&pool)),
            pool,
            preparer: Arc::new(DefaultPreparer::new(PlaceholderStyle::QuestionMark)),
        })
    }

    pub fn with_preparer(mut self, preparer: impl StatementPreparer + 'static) -> Self {
        self.preparer = Arc::new(preparer);
        self
    }

    /// Open a connection outside the pool.
    ///
    /// The caller owns it: commit, roll back and [`close`](Self::close) it.
    pub async fn get_connection(&self) -> DbResult<Connection> {
        let native = self.pool.backend().connect().await?;
        Ok(Connection::new(native))
    }

    pub async fn begin_transaction(&self, conn: &mut Connection) -> DbResult<()> {
        transaction::begin(conn).await
    }

    pub async fn commit(&self, conn: &mut Connection) -> DbResult<()> {
        transaction::commit(conn).await
    }

    pub async fn rollback(&self, conn: &mut Connection) -> DbResult<()> {
        transaction::rollback(conn).await
    }

    pub async fn close(&self, conn: Connection) -> DbResult<()> {
        transaction::close(conn).await
    }

    /// Run `sql` to completion.
    pub async fn execute(
        &self,
        sql: &str,
        args: &[QueryParam],
        conn: Option<&mut Connection>,
    ) -> DbResult<ResultSet> {
        self.executor.execute(sql, args, conn).await
    }

    /// Prepare `statements` and run the result to completion.
    pub async fn execute_statement(
        &self,
        statements: impl Into<Statements>,
        conn: Option<&mut Connection>,
    ) -> DbResult<ResultSet> {
        let statements = statements.into();
        self.executor
            .execute_statement(self.preparer.as_ref(), &statements, conn)
            .await
    }

    /// Stream the rows of `sql`.
    ///
    /// A pooled connection stays with the stream until it ends or is closed.
    pub async fn stream<'c>(
        &self,
        sql: impl Into<String>,
        args: Vec<QueryParam>,
        conn: Option<&'c mut Connection>,
    ) -> DbResult<RowStream<'c>> {
        self.streamer.stream(sql.into(), args, conn).await
    }

    pub async fn stream_statement<'c>(
        &self,
        statements: impl Into<Statements>,
        conn: Option<&'c mut Connection>,
    ) -> DbResult<RowStream<'c>> {
        let statements = statements.into();
        self.streamer
            .stream_statement(self.preparer.as_ref(), &statements, conn)
            .await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the pool. Outstanding caller connections are unaffected.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
