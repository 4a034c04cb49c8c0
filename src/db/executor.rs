//! Query execution engine.
//!
//! Runs one query to completion and materializes a [`ResultSet`]. When the caller
//! supplies a [`Connection`] the query runs on it and the pool is never touched;
//! otherwise a connection is borrowed for exactly this one query and returned
//! before the outcome (success or error) reaches the caller.

use crate::db::connection::Connection;
use crate::db::pool::ConnectionPool;
use crate::db::prepare::StatementPreparer;
use crate::error::DbResult;
use crate::models::{QueryParam, ResultSet, Statements};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Executes queries against a pool or a caller-held connection.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
}

impl QueryExecutor {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Execute `sql` with positional `args`.
    pub async fn execute(
        &self,
        sql: &str,
        args: &[QueryParam],
        conn: Option<&mut Connection>,
    ) -> DbResult<ResultSet> {
        let start = Instant::now();

        let native = match conn {
            Some(conn) => {
                debug!(
                    connection_id = %conn.id(),
                    sql = %sql,
                    params = args.len(),
                    "Executing on caller connection"
                );
                conn.native_mut().execute(sql, args).await?
            }
            None => {
                let mut lease = self.pool.acquire().await?;
                debug!(
                    connection_id = %lease.id(),
                    sql = %sql,
                    params = args.len(),
                    "Executing on pooled connection"
                );
                let outcome = match lease.native() {
                    Ok(native) => native.execute(sql, args).await,
                    Err(e) => Err(e),
                };
                // Back to the pool before the caller sees the outcome
                lease.release();
                outcome?
            }
        };

        let result = ResultSet::from(native);
        debug!(
            rows = result.rows.len(),
            row_count = result.row_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query completed"
        );
        Ok(result)
    }

    /// Prepare `statements` once and execute the prepared text verbatim.
    pub async fn execute_statement(
        &self,
        preparer: &dyn StatementPreparer,
        statements: &Statements,
        conn: Option<&mut Connection>,
    ) -> DbResult<ResultSet> {
        let prepared = preparer.prepare(statements)?;
        self.execute(&prepared.query, &prepared.args, conn).await
    }
}
