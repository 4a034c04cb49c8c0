//! Row decoding for the sqlx backends.
//!
//! Decoding is two-phase: [`categorize_type`] maps a column's declared type name
//! onto a [`TypeCategory`], then a per-database decoder extracts the value as
//! JSON. Exact numerics (DECIMAL/NUMERIC) are returned as strings so no precision
//! is lost; binary columns are base64 encoded; dates, times and UUIDs are
//! rendered as strings. A value that cannot be decoded fails the row with
//! [`DbError::Internal`] rather than turning into `null`.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Row};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Temporal,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Postgres arrays only have a text form here
    if lower.ends_with("[]") {
        return TypeCategory::Text;
    }
    // Checked first: "numeric" would otherwise fall through to the float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity stores reals
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    // Before the integer check: "interval" contains "int"
    if matches!(
        lower.as_str(),
        "date" | "time" | "timetz" | "timestamp" | "timestamptz" | "datetime" | "interval"
    ) {
        return TypeCategory::Temporal;
    }
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }
    if (lower.contains("int") && !lower.contains("point"))
        || lower.contains("serial")
        || lower == "year"
    {
        return TypeCategory::Integer;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Text
}

/// Encode binary data for JSON output.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn string_or_null(v: Option<String>) -> JsonValue {
    v.map(JsonValue::String).unwrap_or(JsonValue::Null)
}

fn decode_failed(column: &str, type_name: &str, err: sqlx::Error) -> DbError {
    DbError::internal(format!(
        "Failed to decode column '{}' of type {}: {}",
        column, type_name, err
    ))
}

/// Conversion from a driver row into the adapter's [`Row`].
pub trait IntoRow {
    fn to_row(&self) -> DbResult<Row>;
}

impl IntoRow for MySqlRow {
    fn to_row(&self) -> DbResult<Row> {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                let value = mysql::decode(self, col.ordinal(), type_name, category)
                    .map_err(|e| decode_failed(col.name(), type_name, e))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

impl IntoRow for PgRow {
    fn to_row(&self) -> DbResult<Row> {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                let value = postgres::decode(self, col.ordinal(), type_name, category)
                    .map_err(|e| decode_failed(col.name(), type_name, e))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

impl IntoRow for SqliteRow {
    fn to_row(&self) -> DbResult<Row> {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::SQLite);
                let value = sqlite::decode(self, col.ordinal(), category)
                    .map_err(|e| decode_failed(col.name(), type_name, e))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

/// Raw DECIMAL/NUMERIC text, preserving the database representation.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Server-rendered text of a value of any type.
///
/// MySQL ships the remaining types (ENUM, SET and friends) as character data
/// in both protocols. Postgres only has a text form for values sent over the
/// simple protocol; binary-encoded values of unknown types are rejected.
#[derive(Debug)]
struct RawText(String);

impl Type<sqlx::MySql> for RawText {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(_ty: &MySqlTypeInfo) -> bool {
        true
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawText {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawText(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawText {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawText(value.as_str()?.to_string())),
            PgValueFormat::Binary => {
                Err("no text form for a binary-encoded value; cast the column to text".into())
            }
        }
    }
}

/// Postgres-style rendering of an interval, e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    fn unit(n: i32, singular: &str, plural: &str) -> String {
        format!("{} {}", n, if n == 1 { singular } else { plural })
    }

    let mut parts = Vec::new();
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        parts.push(unit(years, "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months, "mon", "mons"));
    }
    if days != 0 {
        parts.push(unit(days, "day", "days"));
    }
    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let (secs, micros) = (total / 1_000_000, total % 1_000_000);
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        if micros != 0 {
            clock.push_str(format!(".{:06}", micros).trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

mod mysql {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use sqlx::mysql::types::MySqlTime;

    pub fn decode(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> Result<JsonValue, sqlx::Error> {
        let value = match category {
            TypeCategory::Decimal => {
                string_or_null(row.try_get::<Option<RawDecimal>, _>(idx)?.map(|d| d.0))
            }
            TypeCategory::Integer => match row.try_get::<Option<i64>, _>(idx) {
                Ok(v) => v.map(JsonValue::from).unwrap_or(JsonValue::Null),
                // BIGINT UNSIGNED and YEAR only decode as unsigned
                Err(_) => row
                    .try_get::<Option<u64>, _>(idx)?
                    .map(JsonValue::from)
                    .unwrap_or(JsonValue::Null),
            },
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)?
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => match row.try_get::<Option<f64>, _>(idx) {
                Ok(v) => v.map(float_value).unwrap_or(JsonValue::Null),
                Err(_) => row
                    .try_get::<Option<f32>, _>(idx)?
                    .map(|v| float_value(v as f64))
                    .unwrap_or(JsonValue::Null),
            },
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)?
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => decode_temporal(row, idx, type_name)?,
            TypeCategory::Uuid | TypeCategory::Text => match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => string_or_null(v),
                Err(_) => string_or_null(row.try_get::<Option<RawText>, _>(idx)?.map(|t| t.0)),
            },
        };
        Ok(value)
    }

    fn decode_temporal(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
    ) -> Result<JsonValue, sqlx::Error> {
        let value = match type_name.to_lowercase().as_str() {
            "date" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(|v| v.to_string()),
            // TIME is a duration in MySQL and may be negative or exceed a day
            "time" => row.try_get::<Option<MySqlTime>, _>(idx)?.map(|v| v.to_string()),
            _ => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(|v| v.to_string()),
        };
        Ok(string_or_null(value))
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::types::{PgInterval, PgTimeTz};

    pub fn decode(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> Result<JsonValue, sqlx::Error> {
        let value = match category {
            TypeCategory::Decimal => {
                string_or_null(row.try_get::<Option<RawDecimal>, _>(idx)?.map(|d| d.0))
            }
            TypeCategory::Integer => {
                // Postgres integers do not widen on decode; try each width
                if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                    v.map(JsonValue::from).unwrap_or(JsonValue::Null)
                } else if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
                    v.map(JsonValue::from).unwrap_or(JsonValue::Null)
                } else {
                    row.try_get::<Option<i16>, _>(idx)?
                        .map(JsonValue::from)
                        .unwrap_or(JsonValue::Null)
                }
            }
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)?
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => match row.try_get::<Option<f64>, _>(idx) {
                Ok(v) => v.map(float_value).unwrap_or(JsonValue::Null),
                Err(_) => row
                    .try_get::<Option<f32>, _>(idx)?
                    .map(|v| float_value(v as f64))
                    .unwrap_or(JsonValue::Null),
            },
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)?
                .unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => string_or_null(
                row.try_get::<Option<uuid::Uuid>, _>(idx)?
                    .map(|v| v.to_string()),
            ),
            TypeCategory::Temporal => decode_temporal(row, idx, type_name)?,
            TypeCategory::Text => match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => string_or_null(v),
                Err(_) => string_or_null(row.try_get::<Option<RawText>, _>(idx)?.map(|t| t.0)),
            },
        };
        Ok(value)
    }

    fn decode_temporal(row: &PgRow, idx: usize, type_name: &str) -> Result<JsonValue, sqlx::Error> {
        let value = match type_name.to_lowercase().as_str() {
            "timestamptz" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map(|v| v.to_rfc3339()),
            "timestamp" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(|v| v.to_string()),
            "date" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(|v| v.to_string()),
            "time" => row.try_get::<Option<NaiveTime>, _>(idx)?.map(|v| v.to_string()),
            "timetz" => row
                .try_get::<Option<PgTimeTz<NaiveTime, FixedOffset>>, _>(idx)?
                .map(|v| format!("{}{}", v.time, v.offset)),
            // No text-mode decoder for INTERVAL in sqlx
            "interval" => match row.try_get::<Option<PgInterval>, _>(idx) {
                Ok(v) => v.map(|v| format_interval(v.months, v.days, v.microseconds)),
                Err(_) => row.try_get::<Option<RawText>, _>(idx)?.map(|t| t.0),
            },
            _ => row.try_get::<Option<RawText>, _>(idx)?.map(|t| t.0),
        };
        Ok(string_or_null(value))
    }
}

mod sqlite {
    use super::*;

    pub fn decode(
        row: &SqliteRow,
        idx: usize,
        category: TypeCategory,
    ) -> Result<JsonValue, sqlx::Error> {
        // Any column may hold any storage class; on mismatch decode by the value itself
        let typed = match category {
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .map(|v| v.map(JsonValue::from)),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map(JsonValue::Bool)),
            TypeCategory::Float | TypeCategory::Decimal => row
                .try_get::<Option<f64>, _>(idx)
                .map(|v| v.map(float_value)),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .map(|v| v.map(|b| encode_binary(&b))),
            TypeCategory::Json => row.try_get::<Option<String>, _>(idx).map(|v| {
                v.map(|s| serde_json::from_str::<JsonValue>(&s).unwrap_or(JsonValue::String(s)))
            }),
            TypeCategory::Uuid | TypeCategory::Temporal | TypeCategory::Text => row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map(JsonValue::String)),
        };
        match typed {
            Ok(v) => Ok(v.unwrap_or(JsonValue::Null)),
            // Untyped expression columns report "NULL"
            Err(_) => decode_dynamic(row, idx),
        }
    }

    /// Decode by the value's storage class.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v.map(JsonValue::from).unwrap_or(JsonValue::Null));
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v.map(float_value).unwrap_or(JsonValue::Null));
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return Ok(string_or_null(v));
        }
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|b| encode_binary(&b)).unwrap_or(JsonValue::Null))
    }
}
