//! End-to-end tests against a real SQLite database file.

use dblink::models::{QueryParam, Statement, Statements};
use dblink::{ConnectionConfig, DbError, Handler};
use futures_util::TryStreamExt;
use serde_json::json;
use tempfile::TempDir;

/// Handler over a fresh database file with a seeded `users` table.
async fn setup() -> (Handler, TempDir) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let config = ConnectionConfig::parse(&url).unwrap();
    let handler = Handler::init(&config).await.unwrap();

    handler
        .execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER, score REAL, avatar BLOB)",
            &[],
            None,
        )
        .await
        .unwrap();
    handler
        .execute(
            "INSERT INTO users (name, age, score) VALUES (?, ?, ?), (?, ?, ?)",
            &[
                "alice".into(),
                30.into(),
                1.5.into(),
                "bob".into(),
                25.into(),
                QueryParam::Null,
            ],
            None,
        )
        .await
        .unwrap();

    (handler, dir)
}

async fn count_users(handler: &Handler) -> serde_json::Value {
    let result = handler
        .execute("SELECT COUNT(*) AS n FROM users", &[], None)
        .await
        .unwrap();
    result.rows[0]["n"].clone()
}

#[tokio::test]
async fn test_sqlite_pool_defaults_to_one_connection() {
    let (handler, _dir) = setup().await;
    let stats = handler.pool_stats();
    assert_eq!(stats.max_connections, 1);
    assert_eq!(stats.lent, 0);
}

#[tokio::test]
async fn test_execute_select_and_update() {
    let (handler, _dir) = setup().await;

    let result = handler
        .execute(
            "SELECT name, age, score FROM users WHERE age > ? ORDER BY id",
            &[QueryParam::Int(20)],
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0]["name"], json!("alice"));
    assert_eq!(result.rows[0]["age"], json!(30));
    assert_eq!(result.rows[0]["score"], json!(1.5));
    assert_eq!(result.rows[1]["score"], json!(null));

    let updated = handler
        .execute("UPDATE users SET age = age + 1", &[], None)
        .await
        .unwrap();
    assert!(updated.rows.is_empty());
    assert_eq!(updated.row_count, 2);

    assert_eq!(handler.pool_stats().released, 4);
}

#[tokio::test]
async fn test_binary_column_is_base64() {
    let (handler, _dir) = setup().await;

    handler
        .execute(
            "UPDATE users SET avatar = ? WHERE name = ?",
            &[QueryParam::Bytes(b"hello".to_vec()), "alice".into()],
            None,
        )
        .await
        .unwrap();
    let result = handler
        .execute("SELECT avatar FROM users WHERE name = 'alice'", &[], None)
        .await
        .unwrap();
    assert_eq!(result.rows[0]["avatar"], json!("aGVsbG8="));
}

#[tokio::test]
async fn test_query_error_releases_connection() {
    let (handler, _dir) = setup().await;

    let err = handler
        .execute("SELECT * FROM missing_table", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));
    assert_eq!(handler.pool_stats().lent, 0);

    // Single-connection pool is still usable
    assert_eq!(count_users(&handler).await, json!(2));
}

#[tokio::test]
async fn test_stream_rows_releases_on_end() {
    let (handler, _dir) = setup().await;

    let rows: Vec<_> = handler
        .stream("SELECT name FROM users ORDER BY id", Vec::new(), None)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec![json!("alice"), json!("bob")]);
    assert_eq!(handler.pool_stats().lent, 0);
}

#[tokio::test]
async fn test_abandoned_stream_leaves_connection_usable() {
    let (handler, _dir) = setup().await;

    let mut rows = handler
        .stream("SELECT name FROM users ORDER BY id", Vec::new(), None)
        .await
        .unwrap();
    let first = rows.try_next().await.unwrap().unwrap();
    assert_eq!(first["name"], json!("alice"));
    drop(rows);

    assert_eq!(handler.pool_stats().lent, 0);
    assert_eq!(count_users(&handler).await, json!(2));
}

#[tokio::test]
async fn test_transaction_commit() {
    let (handler, _dir) = setup().await;
    let mut conn = handler.get_connection().await.unwrap();

    handler.begin_transaction(&mut conn).await.unwrap();
    handler
        .execute(
            "INSERT INTO users (name, age) VALUES (?, ?)",
            &[QueryParam::from("carol"), QueryParam::Int(41)],
            Some(&mut conn),
        )
        .await
        .unwrap();
    handler.commit(&mut conn).await.unwrap();
    handler.close(conn).await.unwrap();

    assert_eq!(count_users(&handler).await, json!(3));
    assert_eq!(handler.pool_stats().lent, 0);
}

#[tokio::test]
async fn test_transaction_rollback() {
    let (handler, _dir) = setup().await;
    let mut conn = handler.get_connection().await.unwrap();

    handler.begin_transaction(&mut conn).await.unwrap();
    handler
        .execute("DELETE FROM users", &[], Some(&mut conn))
        .await
        .unwrap();
    let inside = handler
        .execute("SELECT COUNT(*) AS n FROM users", &[], Some(&mut conn))
        .await
        .unwrap();
    assert_eq!(inside.rows[0]["n"], json!(0));

    handler.rollback(&mut conn).await.unwrap();
    handler.close(conn).await.unwrap();

    assert_eq!(count_users(&handler).await, json!(2));
}

#[tokio::test]
async fn test_execute_statement_with_named_parameters() {
    let (handler, _dir) = setup().await;

    let result = handler
        .execute_statement(
            Statement::new("SELECT name FROM users WHERE age = :age AND name <> ':age'")
                .bind_named("age", 25),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["name"], json!("bob"));
}

#[tokio::test]
async fn test_execute_statement_sequence() {
    let (handler, _dir) = setup().await;

    let result = handler
        .execute_statement(
            Statements::Sequence(vec![
                Statement::new("INSERT INTO users (name) VALUES ('dave')"),
                Statement::new("INSERT INTO users (name) VALUES ('erin')"),
            ]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(count_users(&handler).await, json!(4));
}

#[tokio::test]
async fn test_execute_statement_sequence_with_parameters() {
    let (handler, _dir) = setup().await;

    let result = handler
        .execute_statement(
            vec![
                Statement::new("INSERT INTO users (name, age) VALUES (?, ?)")
                    .bind("frank")
                    .bind(50),
                Statement::new("UPDATE users SET age = :age WHERE name = :name")
                    .bind_named("age", 51)
                    .bind_named("name", "frank"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 2);

    let check = handler
        .execute("SELECT age FROM users WHERE name = 'frank'", &[], None)
        .await
        .unwrap();
    assert_eq!(check.rows[0]["age"], json!(51));
}

#[tokio::test]
async fn test_unreachable_database_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite:{}",
        dir.path().join("missing").join("nested").join("x.db").display()
    );
    let config = ConnectionConfig::parse(&url).unwrap();

    let err = Handler::init(&config).await.unwrap_err();
    assert!(matches!(err, DbError::Configuration { .. }));
    assert!(err.suggestion().is_some());
}
