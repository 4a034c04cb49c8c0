//! sqlx implementation of the driver traits.
//!
//! One [`SqlxBackend`] per configured database. Each session is a single
//! unpooled sqlx connection; pooling is done by
//! [`ConnectionPool`](super::ConnectionPool) on top.

use crate::config::ConnectionConfig;
use crate::db::backend::{Backend, NativeConnection};
use crate::db::params::{bind_mysql, bind_postgres, bind_sqlite};
use crate::db::types::IntoRow;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, NativeResult, QueryParam, Row};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlQueryResult};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgQueryResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteQueryResult};
use sqlx::{ConnectOptions, Connection as _, Either, Executor};
use std::str::FromStr;
use tracing::debug;

/// Opens sqlx connections for one configured database.
#[derive(Debug, Clone)]
pub struct SqlxBackend {
    config: ConnectionConfig,
}

impl SqlxBackend {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.config.db_type
    }

    fn invalid_url(&self, err: sqlx::Error) -> DbError {
        let hint = match self.config.db_type {
            DatabaseType::SQLite => "Check the connection URL format: sqlite:path/to/db.sqlite",
            _ => "Check the connection URL format",
        };
        DbError::configuration(
            format!(
                "Invalid {} connection string: {}",
                self.config.db_type.display_name(),
                err
            ),
            hint,
        )
    }

    fn connect_failed(&self, err: sqlx::Error) -> DbError {
        let message = err.to_string();
        DbError::connection(
            format!(
                "Failed to connect to {}: {}",
                self.config.masked_connection_string(),
                message
            ),
            connection_suggestion(&message),
        )
    }
}

/// Map a driver connect failure onto an actionable hint.
fn connection_suggestion(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("access denied") || lower.contains("authentication") {
        "Check the connection credentials are correct"
    } else if lower.contains("unknown database") || lower.contains("does not exist") {
        "Verify the database name exists on the server"
    } else if lower.contains("refused") || lower.contains("timed out") || lower.contains("resolve") {
        "Check the host and port, and that the database server is running"
    } else if lower.contains("unable to open") {
        "Check the database file path and its permissions"
    } else {
        "Check the connection string and that the server is reachable"
    }
}

#[async_trait]
impl Backend for SqlxBackend {
    fn name(&self) -> &str {
        self.config.db_type.display_name()
    }

    async fn connect(&self) -> DbResult<Box<dyn NativeConnection>> {
        let url = &self.config.connection_string;
        let conn = match self.config.db_type {
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::from_str(url)
                    .map_err(|e| self.invalid_url(e))?
                    .charset("utf8mb4");
                let conn = options.connect().await.map_err(|e| self.connect_failed(e))?;
                DbConnection::MySql(conn)
            }
            DatabaseType::PostgreSQL => {
                let options = PgConnectOptions::from_str(url).map_err(|e| self.invalid_url(e))?;
                let conn = options.connect().await.map_err(|e| self.connect_failed(e))?;
                DbConnection::Postgres(conn)
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| self.invalid_url(e))?
                    .create_if_missing(true);
                let conn = options.connect().await.map_err(|e| self.connect_failed(e))?;
                DbConnection::SQLite(conn)
            }
        };
        debug!(backend = %self.name(), "Opened database session");
        Ok(Box::new(conn))
    }
}

/// A live sqlx session for one of the supported databases.
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    async fn run_raw(&mut self, sql: &str) -> DbResult<()> {
        match self {
            DbConnection::MySql(conn) => conn.execute(sql).await.map(|_| ())?,
            DbConnection::Postgres(conn) => conn.execute(sql).await.map(|_| ())?,
            DbConnection::SQLite(conn) => conn.execute(sql).await.map(|_| ())?,
        }
        Ok(())
    }
}

/// Collect every row and sum the affected counts of a (possibly multi-statement) result.
async fn drain_results<Q, R>(
    mut results: BoxStream<'_, Result<Either<Q, R>, sqlx::Error>>,
    rows_affected: fn(&Q) -> u64,
) -> DbResult<NativeResult>
where
    R: IntoRow,
{
    let mut rows = Vec::new();
    let mut affected = 0u64;
    while let Some(item) = results.try_next().await? {
        match item {
            Either::Left(done) => affected += rows_affected(&done),
            Either::Right(row) => rows.push(row.to_row()?),
        }
    }
    Ok(NativeResult {
        rows: (!rows.is_empty()).then_some(rows),
        rows_affected: Some(affected),
    })
}

#[async_trait]
impl NativeConnection for DbConnection {
    async fn execute(&mut self, sql: &str, args: &[QueryParam]) -> DbResult<NativeResult> {
        // Without arguments the text goes through the simple protocol, which
        // accepts several statements separated by semicolons.
        match self {
            DbConnection::MySql(conn) => {
                let results = if args.is_empty() {
                    conn.fetch_many(sql)
                } else {
                    conn.fetch_many(bind_mysql(sql, args))
                };
                drain_results(results, MySqlQueryResult::rows_affected).await
            }
            DbConnection::Postgres(conn) => {
                let results = if args.is_empty() {
                    conn.fetch_many(sql)
                } else {
                    conn.fetch_many(bind_postgres(sql, args))
                };
                drain_results(results, PgQueryResult::rows_affected).await
            }
            DbConnection::SQLite(conn) => {
                let results = if args.is_empty() {
                    conn.fetch_many(sql)
                } else {
                    conn.fetch_many(bind_sqlite(sql, args))
                };
                drain_results(results, SqliteQueryResult::rows_affected).await
            }
        }
    }

    fn open_stream<'a>(
        &'a mut self,
        sql: &'a str,
        args: &'a [QueryParam],
    ) -> BoxStream<'a, DbResult<Row>> {
        match self {
            DbConnection::MySql(conn) => bind_mysql(sql, args)
                .fetch(conn)
                .map(|item| item.map_err(DbError::from).and_then(|row| row.to_row()))
                .boxed(),
            DbConnection::Postgres(conn) => bind_postgres(sql, args)
                .fetch(conn)
                .map(|item| item.map_err(DbError::from).and_then(|row| row.to_row()))
                .boxed(),
            DbConnection::SQLite(conn) => bind_sqlite(sql, args)
                .fetch(conn)
                .map(|item| item.map_err(DbError::from).and_then(|row| row.to_row()))
                .boxed(),
        }
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.run_raw("BEGIN").await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.run_raw("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.run_raw("ROLLBACK").await
    }

    async fn ping(&mut self) -> DbResult<()> {
        match self {
            DbConnection::MySql(conn) => conn.ping().await?,
            DbConnection::Postgres(conn) => conn.ping().await?,
            DbConnection::SQLite(conn) => conn.ping().await?,
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        match *self {
            DbConnection::MySql(conn) => conn.close().await?,
            DbConnection::Postgres(conn) => conn.close().await?,
            DbConnection::SQLite(conn) => conn.close().await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn sqlite_memory() -> Box<dyn NativeConnection> {
        let config = ConnectionConfig::parse("sqlite::memory:").unwrap();
        SqlxBackend::new(config).connect().await.unwrap()
    }

    #[test]
    fn test_connection_suggestion() {
        assert_eq!(
            connection_suggestion("password authentication failed for user"),
            "Check the connection credentials are correct"
        );
        assert_eq!(
            connection_suggestion("Connection refused (os error 111)"),
            "Check the host and port, and that the database server is running"
        );
        assert_eq!(
            connection_suggestion("database \"nope\" does not exist"),
            "Verify the database name exists on the server"
        );
    }

    #[tokio::test]
    async fn test_execute_reports_rows_and_affected_count() {
        let mut conn = sqlite_memory().await;
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();

        let inserted = conn
            .execute(
                "INSERT INTO t (name) VALUES (?), (?)",
                &[QueryParam::from("a"), QueryParam::from("b")],
            )
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, Some(2));
        assert!(inserted.rows.is_none());

        let selected = conn
            .execute("SELECT id, name FROM t WHERE name = ?", &[QueryParam::from("b")])
            .await
            .unwrap();
        let rows = selected.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("b"));
        assert_eq!(rows[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn test_execute_multiple_statements_without_args() {
        let mut conn = sqlite_memory().await;
        let result = conn
            .execute(
                "CREATE TABLE t (v INTEGER);\nINSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(result.rows_affected, Some(2));
    }

    #[tokio::test]
    async fn test_open_stream_yields_rows_in_order() {
        let mut conn = sqlite_memory().await;
        conn.execute(
            "CREATE TABLE t (v INTEGER);\nINSERT INTO t VALUES (1), (2), (3)",
            &[],
        )
        .await
        .unwrap();

        let rows: Vec<Row> = conn
            .open_stream("SELECT v FROM t ORDER BY v", &[])
            .try_collect()
            .await
            .unwrap();
        let values: Vec<_> = rows.iter().map(|r| r["v"].clone()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_values_decode_by_storage_class_when_declared_type_disagrees() {
        let mut conn = sqlite_memory().await;
        conn.execute(
            "CREATE TABLE t (n INTEGER, created DATETIME, id UUID);\n\
             INSERT INTO t VALUES ('x', '2024-01-02 03:04:05', 'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11')",
            &[],
        )
        .await
        .unwrap();

        let rows: Vec<Row> = conn
            .open_stream("SELECT n, created, id FROM t", &[])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], json!("x"));
        assert_eq!(rows[0]["created"], json!("2024-01-02 03:04:05"));
        assert_eq!(rows[0]["id"], json!("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"));
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let mut conn = sqlite_memory().await;
        conn.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();

        conn.begin().await.unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        conn.rollback().await.unwrap();

        let result = conn.execute("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(result.rows.unwrap()[0]["n"], json!(0));
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_syntax_error_maps_to_database_error() {
        let mut conn = sqlite_memory().await;
        let err = conn.execute("SELEC 1", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
    }
}
