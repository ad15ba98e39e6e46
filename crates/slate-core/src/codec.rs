//! Per-type value codecs.
//!
//! Logical values arrive as JSON; each declared [`DataType`] has a `write`
//! conversion into an owned [`SqlValue`], a `read` conversion back, and a
//! physical SQLite column type. The codec layer is the only place that knows
//! sets are stored JSON-encoded or that timeuuids are rewritten for sort
//! order; everything above it deals in logical values.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::timeuuid::{self, TimeuuidError};
use crate::types::DataType;

/// An owned SQL-level value, mirroring SQLite's storage classes.
///
/// Defined here (rather than borrowing rusqlite's type) so that the core
/// crate stays backend-free; the storage crate converts at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Errors raised by value conversion.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid {data_type} value: {detail}")]
    InvalidValue {
        data_type: String,
        detail: String,
    },

    #[error(transparent)]
    Timeuuid(#[from] TimeuuidError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, CodecError>;

fn invalid(data_type: &DataType, detail: impl Into<String>) -> CodecError {
    CodecError::InvalidValue {
        data_type: data_type.to_string(),
        detail: detail.into(),
    }
}

/// Returns the SQLite column type for a declared attribute type.
pub fn physical_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::String | DataType::Uuid | DataType::Timeuuid => "text",
        DataType::Blob | DataType::Json | DataType::Set(_) => "blob",
        // decimal stores its textual form in an integer-affinity column.
        DataType::Boolean
        | DataType::Int
        | DataType::Varint
        | DataType::Decimal
        | DataType::Timestamp => "integer",
        DataType::Float | DataType::Double => "real",
    }
}

// ---------------------------------------------------------------------------
// Write conversion (logical JSON -> SqlValue)
// ---------------------------------------------------------------------------

/// Converts a logical value into its storage form.
pub fn write_value(data_type: &DataType, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match data_type {
        DataType::String => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            // Non-string scalars coerce via their textual form.
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            other => Err(invalid(data_type, format!("unsupported value {other}"))),
        },

        DataType::Blob => blob_bytes(data_type, value).map(SqlValue::Blob),

        DataType::Boolean => match value {
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            other => Err(invalid(data_type, format!("expected boolean, got {other}"))),
        },

        DataType::Int | DataType::Varint => match value.as_i64() {
            Some(n) => Ok(SqlValue::Integer(n)),
            None => Err(invalid(data_type, format!("expected integer, got {value}"))),
        },

        DataType::Float | DataType::Double => match value.as_f64() {
            Some(f) => Ok(SqlValue::Real(f)),
            None => Err(invalid(data_type, format!("expected number, got {value}"))),
        },

        DataType::Decimal => match value {
            Value::String(s) => {
                s.parse::<f64>()
                    .map_err(|_| invalid(data_type, format!("unparseable decimal {s:?}")))?;
                Ok(SqlValue::Text(s.clone()))
            }
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            other => Err(invalid(data_type, format!("expected decimal, got {other}"))),
        },

        DataType::Timestamp => match value {
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| invalid(data_type, format!("expected millis, got {n}"))),
            Value::String(s) => {
                let parsed = DateTime::parse_from_rfc3339(s)
                    .map_err(|e| invalid(data_type, format!("bad timestamp {s:?}: {e}")))?;
                Ok(SqlValue::Integer(parsed.timestamp_millis()))
            }
            other => Err(invalid(data_type, format!("expected timestamp, got {other}"))),
        },

        DataType::Uuid => match value {
            Value::String(s) => {
                let parsed = uuid::Uuid::parse_str(s)
                    .map_err(|_| invalid(data_type, format!("bad uuid {s:?}")))?;
                Ok(SqlValue::Text(parsed.hyphenated().to_string()))
            }
            other => Err(invalid(data_type, format!("expected uuid string, got {other}"))),
        },

        DataType::Timeuuid => match value {
            Value::String(s) => Ok(SqlValue::Text(timeuuid::to_sortable(s)?)),
            other => Err(invalid(data_type, format!("expected timeuuid, got {other}"))),
        },

        DataType::Json => Ok(SqlValue::Blob(serde_json::to_vec(value)?)),

        DataType::Set(element) => match value {
            Value::Array(items) => {
                // Empty and null are equivalent: both store SQL NULL.
                if items.is_empty() {
                    return Ok(SqlValue::Null);
                }
                let written: Vec<Value> = items
                    .iter()
                    .map(|item| write_value(element, item).map(|v| sql_to_json(&v)))
                    .collect::<Result<_>>()?;
                Ok(SqlValue::Blob(serde_json::to_vec(&written)?))
            }
            other => Err(invalid(data_type, format!("expected array, got {other}"))),
        },
    }
}

fn blob_bytes(data_type: &DataType, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .filter(|b| *b <= 255)
                    .map(|b| b as u8)
                    .ok_or_else(|| invalid(data_type, format!("bad byte {item}")))
            })
            .collect(),
        other => Err(invalid(data_type, format!("expected bytes, got {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Read conversion (SqlValue -> logical JSON)
// ---------------------------------------------------------------------------

/// Converts a storage value back into its logical form.
pub fn read_value(data_type: &DataType, value: SqlValue) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match data_type {
        DataType::String => match value {
            SqlValue::Text(s) => Ok(Value::String(s)),
            // Column affinity may have coerced numeric-looking text.
            SqlValue::Integer(i) => Ok(Value::String(i.to_string())),
            SqlValue::Real(f) => Ok(Value::String(f.to_string())),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Blob => match value {
            SqlValue::Blob(bytes) => Ok(bytes_to_json(bytes)),
            SqlValue::Text(s) => Ok(Value::String(s)),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Boolean => match value {
            SqlValue::Integer(i) => Ok(Value::Bool(i != 0)),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Int | DataType::Varint => match value {
            SqlValue::Integer(i) => Ok(Value::from(i)),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Float | DataType::Double => match value {
            SqlValue::Real(f) => number(data_type, f),
            SqlValue::Integer(i) => number(data_type, i as f64),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Decimal => match value {
            SqlValue::Text(s) => Ok(Value::String(s)),
            SqlValue::Integer(i) => Ok(Value::String(i.to_string())),
            SqlValue::Real(f) => Ok(Value::String(f.to_string())),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Timestamp => match value {
            SqlValue::Integer(ms) => {
                let dt = DateTime::<Utc>::from_timestamp_millis(ms)
                    .ok_or_else(|| invalid(data_type, format!("millis out of range: {ms}")))?;
                Ok(Value::String(
                    dt.to_rfc3339_opts(SecondsFormat::Millis, true),
                ))
            }
            SqlValue::Text(s) => Ok(Value::String(s)),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Uuid => match value {
            SqlValue::Text(s) => Ok(Value::String(s)),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Timeuuid => match value {
            SqlValue::Text(s) => Ok(Value::String(timeuuid::from_sortable(&s)?)),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Json => match value {
            SqlValue::Blob(bytes) => Ok(serde_json::from_slice(&bytes)?),
            SqlValue::Text(s) => Ok(serde_json::from_str(&s)?),
            other => Err(invalid(data_type, format!("unexpected storage {other:?}"))),
        },

        DataType::Set(element) => {
            let bytes = match value {
                SqlValue::Blob(bytes) => bytes,
                SqlValue::Text(s) => s.into_bytes(),
                other => {
                    return Err(invalid(data_type, format!("unexpected storage {other:?}")));
                }
            };
            let written: Vec<Value> = serde_json::from_slice(&bytes)?;
            let mut items: Vec<Value> = written
                .into_iter()
                .map(|w| json_to_sql(element, w).and_then(|v| read_value(element, v)))
                .collect::<Result<_>>()?;

            // Deduplicate and return in a stable order: numeric ascending for
            // numeric element types, lexicographic over the JSON form otherwise
            // (booleans and timestamps read back as non-numbers and take the
            // JSON-form path too).
            items.sort_by(|a, b| {
                if element.is_numeric() {
                    if let (Some(fa), Some(fb)) = (a.as_f64(), b.as_f64()) {
                        return fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal);
                    }
                }
                a.to_string().cmp(&b.to_string())
            });
            items.dedup_by(|a, b| a.to_string() == b.to_string());
            Ok(Value::Array(items))
        }
    }
}

fn bytes_to_json(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::String(s),
        Err(e) => Value::Array(
            e.into_bytes()
                .into_iter()
                .map(Value::from)
                .collect(),
        ),
    }
}

fn number(data_type: &DataType, f: f64) -> Result<Value> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| invalid(data_type, format!("non-finite number {f}")))
}

/// JSON form of a written value, used for the set encoding.
fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(*i),
        SqlValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Inverse of [`sql_to_json`], steered by the element's physical type.
fn json_to_sql(element: &DataType, value: Value) -> Result<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Number(n) => {
            if physical_type(element) == "real" {
                n.as_f64()
                    .map(SqlValue::Real)
                    .ok_or_else(|| invalid(element, "bad encoded number"))
            } else {
                n.as_i64()
                    .map(SqlValue::Integer)
                    .ok_or_else(|| invalid(element, "bad encoded integer"))
            }
        }
        Value::String(s) => Ok(SqlValue::Text(s)),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .filter(|b| *b <= 255)
                    .map(|b| b as u8)
                    .ok_or_else(|| invalid(element, format!("bad encoded byte {item}")))
            })
            .collect::<Result<Vec<u8>>>()
            .map(SqlValue::Blob),
        other => Err(invalid(element, format!("bad encoded element {other}"))),
    }
}
