//! Type normalizer: converts document values to the index's declared types.
//!
//! Each field's declared type selects one [`Conversion`]. Decoded JSON
//! scalars are lifted to native values first, so a number inside a `jsonb`
//! column converts the same way as a number column.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use tracing::debug;

use crate::errors::RecordError;
use search_sync_shared::{FieldSpec, FieldType, IndexDocument, RawDocument, SourceValue};

const DATETIME_WITH_OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    String,
    Int32,
    Int64,
    Float,
    Bool,
}

/// How a field's value is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Date,
    Vector { num_dim: usize },
    Geopoint,
    GeopointArray,
    Object,
    ObjectArray,
    Scalar(Scalar),
    ScalarArray(Scalar),
    /// `auto` and `string*`: plain JSON rendering of the native value.
    Native,
}

impl Conversion {
    fn for_field(field: &FieldSpec) -> Result<Self, RecordError> {
        if field.is_vector() {
            return Self::vector(field);
        }

        let conversion = match field.field_type {
            FieldType::Vector => return Self::vector(field),
            FieldType::Date => Self::Date,
            FieldType::Geopoint => Self::Geopoint,
            FieldType::GeopointArray => Self::GeopointArray,
            FieldType::Object => Self::Object,
            FieldType::ObjectArray => Self::ObjectArray,
            FieldType::String => Self::Scalar(Scalar::String),
            FieldType::Int32 => Self::Scalar(Scalar::Int32),
            FieldType::Int64 => Self::Scalar(Scalar::Int64),
            FieldType::Float => Self::Scalar(Scalar::Float),
            FieldType::Bool => Self::Scalar(Scalar::Bool),
            FieldType::StringArray => Self::ScalarArray(Scalar::String),
            FieldType::Int32Array => Self::ScalarArray(Scalar::Int32),
            FieldType::Int64Array => Self::ScalarArray(Scalar::Int64),
            FieldType::FloatArray => Self::ScalarArray(Scalar::Float),
            FieldType::BoolArray => Self::ScalarArray(Scalar::Bool),
            FieldType::Auto | FieldType::StringAuto => Self::Native,
        };
        Ok(conversion)
    }

    fn vector(field: &FieldSpec) -> Result<Self, RecordError> {
        field
            .num_dim
            .filter(|n| *n > 0)
            .and_then(|n| usize::try_from(n).ok())
            .map(|num_dim| Self::Vector { num_dim })
            .ok_or_else(|| {
                RecordError::SchemaValidation(format!(
                    "vector field '{}' needs a positive num_dim",
                    field.name
                ))
            })
    }

    fn apply(self, value: SourceValue) -> Result<Value, String> {
        match self {
            Self::Date => to_epoch_seconds(&value).map(Value::from),
            Self::Vector { num_dim } => to_vector(value, num_dim),
            Self::Geopoint => to_geopoint(parse_text_json(value)?),
            Self::GeopointArray => match parse_text_json(value)? {
                SourceValue::Array(points) => points
                    .into_iter()
                    .map(to_geopoint)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(format!("expected a list of geopoints, got {}", other.kind())),
            },
            Self::Object => to_object(parse_text_json(value)?),
            Self::ObjectArray => match parse_text_json(value)? {
                SourceValue::Array(items) => items
                    .into_iter()
                    .map(|item| parse_text_json(item).and_then(to_object))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(format!("expected a list of objects, got {}", other.kind())),
            },
            Self::Scalar(kind) => to_scalar(kind, value),
            Self::ScalarArray(kind) => to_scalar_array(kind, value),
            Self::Native => Ok(value.to_json()),
        }
    }
}

/// Converts mapped documents into index documents.
pub struct TypeNormalizer;

impl TypeNormalizer {
    /// Normalize `document` for the index.
    ///
    /// Only configured fields are kept and `id` is always `record_id`. Null
    /// optional fields are left out. Any conversion failure fails the whole
    /// record.
    pub fn normalize(
        record_id: &str,
        mut document: RawDocument,
        fields: &[FieldSpec],
    ) -> Result<IndexDocument, RecordError> {
        let mut normalized = IndexDocument::new();

        for field in fields {
            if field.name == "id" {
                document.remove(&field.name);
                continue;
            }

            let value = match document.remove(&field.name).map(lift) {
                None if field.is_optional() => continue,
                None => {
                    return Err(RecordError::SchemaValidation(format!(
                        "required field '{}' is missing",
                        field.name
                    )))
                }
                Some(SourceValue::Null) if field.is_optional() => continue,
                Some(SourceValue::Null) => {
                    return Err(RecordError::Conversion(format!(
                        "required field '{}' is null",
                        field.name
                    )))
                }
                Some(value) => value,
            };

            let converted = Conversion::for_field(field)?
                .apply(value)
                .map_err(|e| RecordError::Conversion(format!("field '{}': {}", field.name, e)))?;
            normalized.insert(field.name.clone(), converted);
        }

        if !document.is_empty() {
            debug!(
                record_id = %record_id,
                dropped = ?document.keys().collect::<Vec<_>>(),
                "Dropped fields without a configured type"
            );
        }

        normalized.insert("id".to_string(), Value::String(record_id.to_string()));
        Ok(normalized)
    }
}

/// Replace decoded JSON scalars and arrays with native values. Objects stay JSON.
fn lift(value: SourceValue) -> SourceValue {
    match value {
        SourceValue::Json(json) => from_json(json),
        SourceValue::Array(items) => SourceValue::Array(items.into_iter().map(lift).collect()),
        other => other,
    }
}

fn from_json(value: Value) -> SourceValue {
    match value {
        Value::Null => SourceValue::Null,
        Value::Bool(b) => SourceValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SourceValue::Int(i),
            None => n.as_f64().map(SourceValue::Float).unwrap_or(SourceValue::Null),
        },
        Value::String(s) => SourceValue::Text(s),
        Value::Array(items) => SourceValue::Array(items.into_iter().map(from_json).collect()),
        object @ Value::Object(_) => SourceValue::Json(object),
    }
}

/// Structured values sometimes arrive serialized; decode text as JSON.
fn parse_text_json(value: SourceValue) -> Result<SourceValue, String> {
    match value {
        SourceValue::Text(text) => serde_json::from_str::<Value>(&text)
            .map(from_json)
            .map_err(|e| format!("invalid JSON text: {}", e)),
        other => Ok(other),
    }
}

/// Parse a date or datetime string as seconds since the epoch.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f][offset]` with a space or `T`,
/// and plain `YYYY-MM-DD`. Values without an offset are read as UTC.
pub(crate) fn parse_datetime_text(text: &str) -> Option<i64> {
    let text = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.timestamp());
    }
    for format in DATETIME_WITH_OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.timestamp());
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp())
}

fn to_epoch_seconds(value: &SourceValue) -> Result<i64, String> {
    match value {
        SourceValue::Timestamp(_) | SourceValue::LocalTimestamp(_) | SourceValue::Date(_) => value
            .epoch_seconds()
            .ok_or_else(|| "date out of range".to_string()),
        SourceValue::Int(seconds) => Ok(*seconds),
        SourceValue::Float(seconds) => float_to_i64(seconds.trunc()),
        SourceValue::Text(text) => {
            parse_datetime_text(text).ok_or_else(|| format!("unable to parse date '{}'", text))
        }
        other => Err(format!("cannot convert {} to a date", other.kind())),
    }
}

/// 2^63; `i64::MAX as f64` rounds up to it.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn float_to_i64(value: f64) -> Result<i64, String> {
    if (-I64_BOUND..I64_BOUND).contains(&value) {
        Ok(value as i64)
    } else {
        Err(format!("{} is out of range for int64", value))
    }
}

fn finite_number(value: f64) -> Result<Value, String> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("{} is not a finite number", value))
}

fn to_vector(value: SourceValue, num_dim: usize) -> Result<Value, String> {
    let components: Vec<f64> = match value {
        SourceValue::Vector(values) => values.into_iter().map(f64::from).collect(),
        SourceValue::Array(items) => items
            .iter()
            .map(|item| match item {
                SourceValue::Int(i) => Ok(*i as f64),
                SourceValue::Float(f) => Ok(*f),
                other => Err(format!("vector component is {}, not a number", other.kind())),
            })
            .collect::<Result<_, _>>()?,
        SourceValue::Text(text) => parse_vector_text(&text)?,
        other => return Err(format!("cannot convert {} to a vector", other.kind())),
    };

    if components.len() != num_dim {
        return Err(format!(
            "vector has {} dimensions, expected {}",
            components.len(),
            num_dim
        ));
    }

    components
        .into_iter()
        .map(finite_number)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn parse_vector_text(text: &str) -> Result<Vec<f64>, String> {
    let text = text.trim();
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("vector text must look like '[x, y, z]': {}", text))?
        .trim();

    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid vector component '{}': {}", part.trim(), e))
        })
        .collect()
}

fn to_geopoint(value: SourceValue) -> Result<Value, String> {
    let pair = match value {
        SourceValue::Array(pair) => pair,
        other => return Err(format!("geopoint must be [lat, lng], got {}", other.kind())),
    };

    let coordinates: Vec<f64> = pair
        .iter()
        .map(|c| match c {
            SourceValue::Int(i) => Some(*i as f64),
            SourceValue::Float(f) => Some(*f),
            _ => None,
        })
        .collect::<Option<_>>()
        .ok_or_else(|| "geopoint coordinates must be numbers".to_string())?;

    match coordinates.as_slice() {
        [lat, lng] if (-90.0..=90.0).contains(lat) && (-180.0..=180.0).contains(lng) => {
            Ok(Value::Array(vec![finite_number(*lat)?, finite_number(*lng)?]))
        }
        [lat, lng] => Err(format!("geopoint [{}, {}] is out of range", lat, lng)),
        _ => Err(format!(
            "geopoint must have 2 coordinates, got {}",
            coordinates.len()
        )),
    }
}

fn to_object(value: SourceValue) -> Result<Value, String> {
    match value {
        SourceValue::Json(object @ Value::Object(_)) => Ok(object),
        other => Err(format!("expected an object, got {}", other.kind())),
    }
}

fn to_scalar(kind: Scalar, value: SourceValue) -> Result<Value, String> {
    match kind {
        Scalar::String => to_string_value(value).map(Value::String),
        Scalar::Int64 => to_integer(&value).map(Value::from),
        Scalar::Int32 => {
            let i = to_integer(&value)?;
            i32::try_from(i)
                .map(Value::from)
                .map_err(|_| format!("{} does not fit in int32", i))
        }
        Scalar::Float => match value {
            SourceValue::Int(i) => finite_number(i as f64),
            SourceValue::Float(f) => finite_number(f),
            SourceValue::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid float '{}': {}", text, e))
                .and_then(finite_number),
            other => Err(format!("cannot convert {} to float", other.kind())),
        },
        Scalar::Bool => match value {
            SourceValue::Bool(b) => Ok(Value::Bool(b)),
            SourceValue::Int(0) => Ok(Value::Bool(false)),
            SourceValue::Int(1) => Ok(Value::Bool(true)),
            SourceValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "t" => Ok(Value::Bool(true)),
                "false" | "f" => Ok(Value::Bool(false)),
                _ => Err(format!("invalid bool '{}'", text)),
            },
            other => Err(format!("cannot convert {} to bool", other.kind())),
        },
    }
}

fn to_string_value(value: SourceValue) -> Result<String, String> {
    match value {
        SourceValue::Text(text) => Ok(text),
        SourceValue::Int(i) => Ok(i.to_string()),
        SourceValue::Float(f) => Ok(f.to_string()),
        SourceValue::Bool(b) => Ok(b.to_string()),
        SourceValue::Timestamp(ts) => Ok(ts.to_rfc3339()),
        SourceValue::LocalTimestamp(ts) => Ok(ts.and_utc().to_rfc3339()),
        SourceValue::Date(date) => Ok(date.to_string()),
        SourceValue::Json(json) => Ok(json.to_string()),
        other => Err(format!("cannot convert {} to string", other.kind())),
    }
}

fn to_integer(value: &SourceValue) -> Result<i64, String> {
    match value {
        SourceValue::Int(i) => Ok(*i),
        SourceValue::Float(f) if f.fract() == 0.0 => float_to_i64(*f),
        SourceValue::Text(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid integer '{}': {}", text, e)),
        SourceValue::Timestamp(_) | SourceValue::LocalTimestamp(_) | SourceValue::Date(_) => {
            to_epoch_seconds(value)
        }
        other => Err(format!("cannot convert {} to integer", other.kind())),
    }
}

fn to_scalar_array(kind: Scalar, value: SourceValue) -> Result<Value, String> {
    let items = match parse_text_json(value)? {
        SourceValue::Array(items) => items,
        SourceValue::Vector(values) if kind == Scalar::Float => values
            .into_iter()
            .map(|v| SourceValue::Float(f64::from(v)))
            .collect(),
        other => return Err(format!("expected a list, got {}", other.kind())),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(position, item)| match item {
            SourceValue::Null => Err(format!("list element {} is null", position)),
            item => to_scalar(kind, item),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}
