//! Query-related data models.
//!
//! This module defines statement parameters, statement results and the
//! read/mutation classification used to route a statement.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Leading keywords that mark a statement as a mutation.
const MUTATION_KEYWORDS: [&str; 4] = ["insert", "update", "delete", "create"];

/// A parameter value for prepared statements.
///
/// Parameters cross the driver boundary as a JSON array, so every variant has a
/// lossless JSON form. Integers outside the `i64` range are rejected on parse,
/// and `Json` only carries arrays and objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Array or object, bound as a JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Parse one JSON value.
    ///
    /// Unlike plain deserialization this also rejects integer literals too large
    /// for `u64`, which the JSON parser would otherwise turn into floats.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let param: Self = serde_json::from_str(text)?;
        if matches!(param, Self::Float(_)) && is_integer_literal(text) {
            return Err(serde::de::Error::custom(out_of_range(text.trim())));
        }
        Ok(param)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl TryFrom<JsonValue> for QueryParam {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        Ok(match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(v), _) => Self::Int(v),
                (None, _) if n.is_u64() => return Err(out_of_range(&n)),
                (None, Some(v)) => Self::Float(v),
                (None, None) => return Err(format!("number {} is not representable", n)),
            },
            JsonValue::String(v) => Self::String(v),
            v @ (JsonValue::Array(_) | JsonValue::Object(_)) => Self::Json(v),
        })
    }
}

impl<'de> Deserialize<'de> for QueryParam {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

fn out_of_range(n: impl std::fmt::Display) -> String {
    format!("integer {} is outside the signed 64-bit range", n)
}

fn is_integer_literal(text: &str) -> bool {
    let text = text.trim();
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One result row: column name to value.
pub type Row = serde_json::Map<String, JsonValue>;

/// How a statement is routed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Changes stored data and reports an affected-row count.
    Mutation,
    /// Returns rows.
    Read,
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mutation => write!(f, "mutation"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Classify a statement by its leading keyword.
///
/// Case-insensitive prefix match on the trimmed SQL: `insert`, `update`, `delete`
/// and `create` are mutations, everything else is a read.
pub fn classify(sql: &str) -> StatementKind {
    let sql = sql.trim_start();
    let is_mutation = MUTATION_KEYWORDS.iter().any(|keyword| {
        sql.get(..keyword.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
    });

    if is_mutation {
        StatementKind::Mutation
    } else {
        StatementKind::Read
    }
}

/// Result of one executed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementOutput {
    /// Rows returned by a read, in result order.
    Rows(Vec<Row>),
    /// Rows affected by a mutation.
    Affected(u64),
}

impl StatementOutput {
    /// Get the rows of a read result.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Affected(_) => None,
        }
    }

    /// Take the rows of a read result.
    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Affected(_) => None,
        }
    }

    /// Get the affected-row count of a mutation result.
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::Rows(_) => None,
            Self::Affected(count) => Some(*count),
        }
    }

    /// Which kind of statement produced this output.
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Rows(_) => StatementKind::Read,
            Self::Affected(_) => StatementKind::Mutation,
        }
    }
}
