//! Document shapes along the sync path.
//!
//! Rows are read from the source as [`SourceRow`]s of native values, mapped
//! into [`RawDocument`]s keyed by target field name (still native values,
//! which is what transform hooks see), and finally normalized into
//! [`IndexDocument`]s of plain JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// A value as delivered by the source database.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Timestamp with time zone.
    Timestamp(DateTime<Utc>),
    /// Timestamp without time zone; read as UTC.
    LocalTimestamp(NaiveDateTime),
    Date(NaiveDate),
    /// Decoded JSON / JSONB column.
    Json(Value),
    /// Opaque vector column (pgvector).
    Vector(Vec<f32>),
    Array(Vec<SourceValue>),
}

impl SourceValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceValue::Null => "null",
            SourceValue::Bool(_) => "bool",
            SourceValue::Int(_) => "int",
            SourceValue::Float(_) => "float",
            SourceValue::Text(_) => "text",
            SourceValue::Timestamp(_) => "timestamptz",
            SourceValue::LocalTimestamp(_) => "timestamp",
            SourceValue::Date(_) => "date",
            SourceValue::Json(_) => "json",
            SourceValue::Vector(_) => "vector",
            SourceValue::Array(_) => "array",
        }
    }

    /// Seconds since the epoch for temporal values.
    pub fn epoch_seconds(&self) -> Option<i64> {
        match self {
            SourceValue::Timestamp(ts) => Some(ts.timestamp()),
            SourceValue::LocalTimestamp(ts) => Some(ts.and_utc().timestamp()),
            SourceValue::Date(date) => date
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc().timestamp()),
            _ => None,
        }
    }

    /// Plain JSON rendering. Temporal values become epoch seconds and vectors
    /// become float arrays, so the result is always index-safe.
    pub fn to_json(&self) -> Value {
        match self {
            SourceValue::Null => Value::Null,
            SourceValue::Bool(b) => Value::Bool(*b),
            SourceValue::Int(i) => Value::from(*i),
            SourceValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SourceValue::Text(s) => Value::String(s.clone()),
            SourceValue::Timestamp(_)
            | SourceValue::LocalTimestamp(_)
            | SourceValue::Date(_) => self.epoch_seconds().map(Value::from).unwrap_or(Value::Null),
            SourceValue::Json(v) => v.clone(),
            SourceValue::Vector(v) => Value::Array(
                v.iter()
                    .map(|x| {
                        serde_json::Number::from_f64(f64::from(*x))
                            .map(Value::Number)
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            ),
            SourceValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        SourceValue::Text(value.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(value: String) -> Self {
        SourceValue::Text(value)
    }
}

impl From<i64> for SourceValue {
    fn from(value: i64) -> Self {
        SourceValue::Int(value)
    }
}

impl From<f64> for SourceValue {
    fn from(value: f64) -> Self {
        SourceValue::Float(value)
    }
}

impl From<bool> for SourceValue {
    fn from(value: bool) -> Self {
        SourceValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for SourceValue {
    fn from(value: DateTime<Utc>) -> Self {
        SourceValue::Timestamp(value)
    }
}

impl<T: Into<SourceValue>> From<Option<T>> for SourceValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SourceValue::Null)
    }
}

/// A source row: column name to native value.
pub type SourceRow = BTreeMap<String, SourceValue>;

/// A mapped document: target field name to native value.
pub type RawDocument = BTreeMap<String, SourceValue>;

/// A document ready for the index.
pub type IndexDocument = serde_json::Map<String, Value>;
