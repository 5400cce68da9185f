//! Database-agnostic type mappings.
//!
//! This module converts driver rows into JSON rows.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! A column that cannot be represented in JSON fails the whole row with a
//! `Serialization` error instead of being silently replaced by `null`.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Row as JsonRow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgHasArrayType, PgRow, PgTypeInfo, PgValueFormat, PgValueRef, Postgres};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Decimal;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Rendering of timestamps in result rows, always UTC with millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

const TIME_FORMAT: &str = "%H:%M:%S%.3f";

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    Date,
    Time,
    /// One-dimensional PostgreSQL array
    Array,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if db == DatabaseType::PostgreSQL && lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Date/time before integers: "interval" and "point" contain "int"
    match lower.as_str() {
        "timestamp" | "timestamptz" | "datetime" | "timestamp with time zone"
        | "timestamp without time zone" => return TypeCategory::Timestamp,
        "date" => return TypeCategory::Date,
        "time" | "time without time zone" => return TypeCategory::Time,
        _ => {}
    }
    if lower.contains("interval") || lower.contains("point") {
        return TypeCategory::Text;
    }

    // Integer types
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    // JSON types
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

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

impl Type<Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <Decimal as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl PgHasArrayType for RawDecimal {
    fn array_type_info() -> PgTypeInfo {
        <Decimal as PgHasArrayType>::array_type_info()
    }

    fn array_compatible(ty: &PgTypeInfo) -> bool {
        <Decimal as PgHasArrayType>::array_compatible(ty)
    }
}

// Binary NUMERIC header: ndigits, weight, sign, dscale (16 bits each)
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;
const MAX_DECIMAL_SCALE: u16 = 28;
// Base-10000 groups before the point; 10000^7 already exceeds Decimal's range
const MAX_DECIMAL_WEIGHT: i16 = 6;

/// Inspect a binary NUMERIC header.
///
/// Returns the text of the special values, `None` for ordinary numbers that fit
/// `Decimal`, and an error for numbers that don't.
fn binary_numeric_special(bytes: &[u8]) -> Result<Option<&'static str>, String> {
    let field = |i: usize| bytes.get(i..i + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));
    let (Some(weight), Some(sign), Some(scale)) = (field(2), field(4), field(6)) else {
        return Err("truncated NUMERIC value".to_string());
    };
    match sign {
        NUMERIC_NAN => return Ok(Some("NaN")),
        NUMERIC_PINF => return Ok(Some("Infinity")),
        NUMERIC_NINF => return Ok(Some("-Infinity")),
        _ => {}
    }
    if scale > MAX_DECIMAL_SCALE {
        return Err(format!(
            "NUMERIC scale {} exceeds {} fractional digits",
            scale, MAX_DECIMAL_SCALE
        ));
    }
    if weight as i16 > MAX_DECIMAL_WEIGHT {
        return Err("NUMERIC value exceeds 28 significant digits".to_string());
    }
    Ok(None)
}

impl<'r> Decode<'r, Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => {
                if let Some(special) = binary_numeric_special(value.as_bytes()?)? {
                    return Ok(RawDecimal(special.to_string()));
                }
                let decimal = <Decimal as Decode<Postgres>>::decode(value)?;
                Ok(RawDecimal(decimal.to_string()))
            }
        }
    }
}

/// A PostgreSQL value with no JSON category, kept in its text form.
///
/// Text-format values (unprepared queries) are taken as sent. Binary values are
/// decoded for the types that have a sqlx mapping and rendered the way the server
/// would print them.
#[derive(Debug)]
pub struct PgText(pub String);

impl Type<Postgres> for PgText {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl<'r> Decode<'r, Postgres> for PgText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        if let PgValueFormat::Text = value.format() {
            return Ok(PgText(value.as_str()?.to_string()));
        }
        let type_name = value.type_info().name().to_string();
        match type_name.as_str() {
            "INTERVAL" => {
                let v = <PgInterval as Decode<Postgres>>::decode(value)?;
                Ok(PgText(interval_text(v.months, v.days, v.microseconds)))
            }
            "INET" | "CIDR" => {
                let net = <IpNetwork as Decode<Postgres>>::decode(value)?;
                Ok(PgText(inet_text(net, type_name == "CIDR")))
            }
            _ => Err(format!("binary {} values are not supported", type_name).into()),
        }
    }
}

/// Render an interval in the server's default `postgres` style, e.g.
/// `1 year 2 mons -3 days +04:05:06.5`.
pub fn interval_text(months: i32, days: i32, microseconds: i64) -> String {
    let mut parts = Vec::new();
    let mut previous_negative = false;

    for (value, unit) in [
        (i64::from(months / 12), "year"),
        (i64::from(months % 12), "mon"),
        (i64::from(days), "day"),
    ] {
        if value == 0 {
            continue;
        }
        let sign = if previous_negative && value > 0 { "+" } else { "" };
        let plural = if value == 1 { "" } else { "s" };
        parts.push(format!("{}{} {}{}", sign, value, unit, plural));
        previous_negative = value < 0;
    }

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 {
            "-"
        } else if previous_negative {
            "+"
        } else {
            ""
        };
        let micros = microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            time.push('.');
            time.push_str(format!("{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

/// Render an address the way the server does: `inet` omits a full-length prefix,
/// `cidr` always shows it.
pub fn inet_text(net: IpNetwork, cidr: bool) -> String {
    let full = if net.is_ipv4() { 32 } else { 128 };
    if !cidr && net.prefix() == full {
        net.ip().to_string()
    } else {
        net.to_string()
    }
}

// =============================================================================
// Value Rendering
// =============================================================================

/// Encode binary data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Render a float, rejecting NaN and infinities.
pub fn float_value(v: f64, column: &str) -> DbResult<JsonValue> {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .ok_or_else(|| {
            DbError::serialization(format!(
                "Column '{}' holds non-finite value {}",
                column, v
            ))
        })
}

pub fn timestamp_value(ts: DateTime<Utc>) -> JsonValue {
    JsonValue::String(ts.format(TIMESTAMP_FORMAT).to_string())
}

/// Naive timestamps are taken to be UTC.
pub fn naive_timestamp_value(ts: NaiveDateTime) -> JsonValue {
    timestamp_value(ts.and_utc())
}

/// Dates render as midnight UTC timestamps.
pub fn date_value(date: NaiveDate) -> JsonValue {
    naive_timestamp_value(date.and_time(NaiveTime::MIN))
}

pub fn time_value(time: NaiveTime) -> JsonValue {
    JsonValue::String(time.format(TIME_FORMAT).to_string())
}

fn undecodable(column: &str, type_name: &str) -> DbError {
    DbError::serialization(format!(
        "Cannot decode column '{}' of type {}",
        column, type_name
    ))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> DbResult<JsonRow>;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> DbResult<JsonRow> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                let value = mysql::decode_column(self, idx, type_name, category)
                    .map_err(|e| with_column(e, col.name(), type_name))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> DbResult<JsonRow> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, idx, type_name, category)
                    .map_err(|e| with_column(e, col.name(), type_name))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> DbResult<JsonRow> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::SQLite);
                let value = sqlite::decode_column(self, idx, type_name, category)
                    .map_err(|e| with_column(e, col.name(), type_name))?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

/// Decoders report failures without the column name; attach it here.
fn with_column(err: DbError, column: &str, type_name: &str) -> DbError {
    match err {
        DbError::Serialization { message } if message.is_empty() => {
            undecodable(column, type_name)
        }
        DbError::Serialization { message } => DbError::serialization(format!(
            "Column '{}' ({}): {}",
            column, type_name, message
        )),
        other => other,
    }
}

/// Placeholder error for decoders; `with_column` fills in the details.
fn unsupported() -> DbError {
    DbError::serialization("")
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> DbResult<JsonValue> {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            TypeCategory::Time => decode_time(row, idx),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<RawDecimal>, _>(idx)?
            .map(|v| JsonValue::String(v.0))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        // Check NULL first
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(JsonValue::Null);
        }
        // Try signed types
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        // Try unsigned types
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        Err(unsupported())
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<bool>, _>(idx)?
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        let name = row.column(idx).name();
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map_or(Ok(JsonValue::Null), |v| float_value(v, name));
        }
        match row.try_get::<Option<f32>, _>(idx)? {
            Some(v) => float_value(v as f64, name),
            None => Ok(JsonValue::Null),
        }
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|v| encode_binary_value(&v))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<JsonValue>, _>(idx)?
            .unwrap_or(JsonValue::Null))
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        // TIMESTAMP is stored in UTC; DATETIME carries no zone
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return Ok(v.map(timestamp_value).unwrap_or(JsonValue::Null));
        }
        Ok(row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(naive_timestamp_value)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_date(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(date_value)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_time(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(time_value)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str) -> DbResult<JsonValue> {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => {
                // Check if this might be JSON
                if type_name.to_lowercase().contains("json") {
                    if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                        return Ok(json);
                    }
                }
                Ok(JsonValue::String(v))
            }
            Ok(None) => Ok(JsonValue::Null),
            Err(_) => Err(unsupported()),
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> DbResult<JsonValue> {
        match category {
            TypeCategory::Array => decode_array(row, idx, type_name),
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            TypeCategory::Time => decode_time(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<RawDecimal>, _>(idx)?
            .map(|v| JsonValue::String(v.0))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(JsonValue::Null);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        Err(unsupported())
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<bool>, _>(idx)?
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_float(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        let name = row.column(idx).name();
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map_or(Ok(JsonValue::Null), |v| float_value(v, name));
        }
        match row.try_get::<Option<f32>, _>(idx)? {
            Some(v) => float_value(v as f64, name),
            None => Ok(JsonValue::Null),
        }
    }

    fn decode_binary_col(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|v| encode_binary_value(&v))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_json(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<JsonValue>, _>(idx)?
            .unwrap_or(JsonValue::Null))
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<uuid::Uuid>, _>(idx)?
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return Ok(v.map(timestamp_value).unwrap_or(JsonValue::Null));
        }
        Ok(row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(naive_timestamp_value)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_date(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(date_value)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_time(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(time_value)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_text(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return Ok(v.map(JsonValue::String).unwrap_or(JsonValue::Null));
        }
        // interval, inet and friends
        Ok(row
            .try_get::<Option<PgText>, _>(idx)?
            .map(|v| JsonValue::String(v.0))
            .unwrap_or(JsonValue::Null))
    }

    /// Decode a one-dimensional array element-wise through the element's category.
    fn decode_array(row: &PgRow, idx: usize, type_name: &str) -> DbResult<JsonValue> {
        let name = row.column(idx).name();
        let element = type_name.trim_end_matches("[]");
        let decoded = match categorize_type(element, DatabaseType::PostgreSQL) {
            TypeCategory::Integer => array_of::<i16>(row, idx, |v| Ok(v.into()))
                .or_else(|| array_of::<i32>(row, idx, |v| Ok(v.into())))
                .or_else(|| array_of::<i64>(row, idx, |v| Ok(v.into()))),
            TypeCategory::Float => array_of::<f64>(row, idx, |v| float_value(v, name))
                .or_else(|| array_of::<f32>(row, idx, |v| float_value(f64::from(v), name))),
            TypeCategory::Decimal => {
                array_of::<RawDecimal>(row, idx, |v| Ok(JsonValue::String(v.0)))
            }
            TypeCategory::Boolean => array_of::<bool>(row, idx, |v| Ok(JsonValue::Bool(v))),
            TypeCategory::Text => array_of::<String>(row, idx, |v| Ok(JsonValue::String(v))),
            TypeCategory::Binary => {
                array_of::<Vec<u8>>(row, idx, |v| Ok(encode_binary_value(&v)))
            }
            TypeCategory::Json => array_of::<JsonValue>(row, idx, Ok),
            TypeCategory::Uuid => {
                array_of::<uuid::Uuid>(row, idx, |v| Ok(JsonValue::String(v.to_string())))
            }
            TypeCategory::Timestamp => {
                array_of::<DateTime<Utc>>(row, idx, |v| Ok(timestamp_value(v))).or_else(|| {
                    array_of::<NaiveDateTime>(row, idx, |v| Ok(naive_timestamp_value(v)))
                })
            }
            TypeCategory::Date => array_of::<NaiveDate>(row, idx, |v| Ok(date_value(v))),
            TypeCategory::Time => array_of::<NaiveTime>(row, idx, |v| Ok(time_value(v))),
            _ => None,
        };
        decoded.unwrap_or_else(|| Err(unsupported()))
    }

    /// `None` when the column isn't an array of `T`.
    fn array_of<T>(
        row: &PgRow,
        idx: usize,
        render: impl Fn(T) -> DbResult<JsonValue>,
    ) -> Option<DbResult<JsonValue>>
    where
        T: for<'r> Decode<'r, Postgres> + Type<Postgres> + PgHasArrayType,
    {
        let items = match row.try_get::<Option<Vec<Option<T>>>, _>(idx) {
            Ok(Some(items)) => items,
            Ok(None) => return Some(Ok(JsonValue::Null)),
            Err(_) => return None,
        };
        Some(
            items
                .into_iter()
                .map(|item| item.map_or(Ok(JsonValue::Null), &render))
                .collect::<DbResult<Vec<_>>>()
                .map(JsonValue::Array),
        )
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> DbResult<JsonValue> {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx, type_name),
            TypeCategory::Date => decode_date(row, idx, type_name),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<i64>, _>(idx)?
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null))
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<bool>, _>(idx)?
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null))
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> DbResult<JsonValue> {
        match row.try_get::<Option<f64>, _>(idx)? {
            Some(v) => float_value(v, row.column(idx).name()),
            None => Ok(JsonValue::Null),
        }
    }

    fn decode_binary_col(row: &SqliteRow, idx: usize) -> DbResult<JsonValue> {
        Ok(row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|v| encode_binary_value(&v))
            .unwrap_or(JsonValue::Null))
    }

    // SQLite stores date/time values as text or numbers; keep the raw text when
    // it doesn't parse.
    fn decode_timestamp(row: &SqliteRow, idx: usize, type_name: &str) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Ok(v.map(naive_timestamp_value).unwrap_or(JsonValue::Null));
        }
        decode_text(row, idx, type_name)
    }

    fn decode_date(row: &SqliteRow, idx: usize, type_name: &str) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return Ok(v.map(date_value).unwrap_or(JsonValue::Null));
        }
        decode_text(row, idx, type_name)
    }

    fn decode_text(row: &SqliteRow, idx: usize, type_name: &str) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            let Some(v) = v else {
                return Ok(JsonValue::Null);
            };
            if type_name.to_lowercase().contains("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return Ok(json);
                }
            }
            return Ok(JsonValue::String(v));
        }
        // Untyped expression columns report their runtime storage class
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(JsonValue::Number(v.into()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v, row.column(idx).name());
        }
        if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return Ok(encode_binary_value(&v));
        }
        Err(unsupported())
    }
}
