//! Parameter binding and the JSON payloads exchanged with the driver adapter.
//!
//! Parameters travel to the adapter as a JSON array and read results come back as
//! a JSON array of row objects. The binders then attach decoded parameters to
//! backend-specific query objects.

use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use serde_json::value::RawValue;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// Serialize statement parameters into the adapter payload.
///
/// Non-finite floats have no JSON form and are rejected rather than sent as `null`.
/// `Json` parameters must hold an array or object; a scalar would come back as a
/// different variant and bind with a different SQL type.
pub fn encode_params(params: &[QueryParam]) -> DbResult<String> {
    for (idx, param) in params.iter().enumerate() {
        match param {
            QueryParam::Float(v) if !v.is_finite() => {
                return Err(DbError::serialization(format!(
                    "Parameter {} is not representable: {}",
                    idx + 1,
                    v
                )));
            }
            QueryParam::Json(v) if !(v.is_array() || v.is_object()) => {
                return Err(DbError::serialization(format!(
                    "Parameter {} is not representable: JSON parameters must be an array or object, got {}",
                    idx + 1,
                    v
                )));
            }
            _ => {}
        }
    }
    Ok(serde_json::to_string(params)?)
}

/// Parse the parameter payload back into values.
pub fn decode_params(payload: &str) -> DbResult<Vec<QueryParam>> {
    let values: Vec<&RawValue> = serde_json::from_str(payload)?;
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            QueryParam::from_json_str(value.get()).map_err(|e| {
                DbError::serialization(format!("Parameter {} is not representable: {}", idx + 1, e))
            })
        })
        .collect()
}

/// Serialize result rows into the adapter payload.
pub fn encode_rows(rows: &[Row]) -> DbResult<String> {
    Ok(serde_json::to_string(rows)?)
}

/// Parse a row payload into rows.
pub fn decode_rows(payload: &str) -> DbResult<Vec<Row>> {
    serde_json::from_str(payload)
        .map_err(|e| DbError::serialization(format!("Malformed row payload: {}", e)))
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
