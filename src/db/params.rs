//! Parameter binding for the sqlx backends.
//!
//! Turns the ordered [`QueryParam`] list into a bound sqlx query for each
//! database-specific argument type.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

pub(crate) fn bind_mysql<'q>(sql: &'q str, args: &'q [QueryParam]) -> Query<'q, MySql, MySqlArguments> {
    args.iter().fold(sqlx::query(sql), |query, param| match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    })
}

pub(crate) fn bind_postgres<'q>(sql: &'q str, args: &'q [QueryParam]) -> Query<'q, Postgres, PgArguments> {
    args.iter().fold(sqlx::query(sql), |query, param| match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    })
}

pub(crate) fn bind_sqlite<'q>(
    sql: &'q str,
    args: &'q [QueryParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    args.iter().fold(sqlx::query(sql), |query, param| match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    })
}
