//! Decoding of source rows into native values.
//!
//! Column types are looked up once per source. Types without a native
//! decoding are cast server side (`numeric` to `float8`, unknown scalars to
//! `text`), except pgvector columns, which are read raw and decoded here.

use sqlx::postgres::{PgRow, PgValueFormat};
use sqlx::{Row, ValueRef};

use super::sql::quote_ident;
use crate::errors::StoreError;
use search_sync_shared::SourceValue;

/// How a column is selected and decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
    Timestamptz,
    Timestamp,
    Date,
    Json,
    Vector,
    TextArray,
    IntArray,
    FloatArray,
    BoolArray,
}

/// Select and decode plan for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnPlan {
    pub name: String,
    pub udt_name: String,
    pub kind: ColumnKind,
    cast: Option<&'static str>,
}

impl ColumnPlan {
    /// Plan a column from its `information_schema` type name.
    pub fn from_udt(name: impl Into<String>, udt_name: impl Into<String>) -> Self {
        let name = name.into();
        let udt_name = udt_name.into();
        let (kind, cast) = match udt_name.as_str() {
            "bool" => (ColumnKind::Bool, None),
            "int8" => (ColumnKind::Int, None),
            "int2" | "int4" | "oid" => (ColumnKind::Int, Some("int8")),
            "float8" => (ColumnKind::Float, None),
            "float4" | "numeric" => (ColumnKind::Float, Some("float8")),
            "text" | "varchar" => (ColumnKind::Text, None),
            "timestamptz" => (ColumnKind::Timestamptz, None),
            "timestamp" => (ColumnKind::Timestamp, None),
            "date" => (ColumnKind::Date, None),
            "json" | "jsonb" => (ColumnKind::Json, None),
            "vector" => (ColumnKind::Vector, None),
            "_bool" => (ColumnKind::BoolArray, None),
            "_int8" => (ColumnKind::IntArray, None),
            "_int2" | "_int4" => (ColumnKind::IntArray, Some("int8[]")),
            "_float8" => (ColumnKind::FloatArray, None),
            "_float4" | "_numeric" => (ColumnKind::FloatArray, Some("float8[]")),
            "_text" | "_varchar" => (ColumnKind::TextArray, None),
            other if other.starts_with('_') => (ColumnKind::TextArray, Some("text[]")),
            _ => (ColumnKind::Text, Some("text")),
        };

        Self {
            name,
            udt_name,
            kind,
            cast,
        }
    }

    /// Expression for the select list.
    pub fn select_expr(&self) -> String {
        let column = quote_ident(&self.name);
        match self.cast {
            Some(cast) => format!("{}::{} AS {}", column, cast, column),
            None => column,
        }
    }

    /// Decode the column at `index` of `row`.
    pub fn decode(&self, row: &PgRow, index: usize) -> Result<SourceValue, StoreError> {
        let value = match self.kind {
            ColumnKind::Bool => row
                .try_get::<Option<bool>, _>(index)?
                .map(SourceValue::Bool),
            ColumnKind::Int => row.try_get::<Option<i64>, _>(index)?.map(SourceValue::Int),
            ColumnKind::Float => row
                .try_get::<Option<f64>, _>(index)?
                .map(SourceValue::Float),
            ColumnKind::Text => row
                .try_get::<Option<String>, _>(index)?
                .map(SourceValue::Text),
            ColumnKind::Timestamptz => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
                .map(SourceValue::Timestamp),
            ColumnKind::Timestamp => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
                .map(SourceValue::LocalTimestamp),
            ColumnKind::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(index)?
                .map(SourceValue::Date),
            ColumnKind::Json => row
                .try_get::<Option<serde_json::Value>, _>(index)?
                .map(SourceValue::Json),
            ColumnKind::Vector => {
                let raw = row.try_get_raw(index)?;
                if raw.is_null() {
                    None
                } else {
                    let format = raw.format();
                    let bytes = raw.as_bytes().map_err(|e| {
                        StoreError::decode(format!("column '{}': {}", self.name, e))
                    })?;
                    let values = match format {
                        PgValueFormat::Binary => decode_pgvector_binary(bytes),
                        PgValueFormat::Text => decode_pgvector_text(bytes),
                    }
                    .map_err(|e| StoreError::decode(format!("column '{}': {}", self.name, e)))?;
                    Some(SourceValue::Vector(values))
                }
            }
            ColumnKind::TextArray => row
                .try_get::<Option<Vec<Option<String>>>, _>(index)?
                .map(array_of),
            ColumnKind::IntArray => row
                .try_get::<Option<Vec<Option<i64>>>, _>(index)?
                .map(array_of),
            ColumnKind::FloatArray => row
                .try_get::<Option<Vec<Option<f64>>>, _>(index)?
                .map(array_of),
            ColumnKind::BoolArray => row
                .try_get::<Option<Vec<Option<bool>>>, _>(index)?
                .map(array_of),
        };

        Ok(value.unwrap_or(SourceValue::Null))
    }
}

fn array_of<T: Into<SourceValue>>(items: Vec<Option<T>>) -> SourceValue {
    SourceValue::Array(items.into_iter().map(SourceValue::from).collect())
}

/// Decode the binary wire form of a pgvector value:
/// `u16` dimension, `u16` reserved, then big-endian `f32`s.
pub(crate) fn decode_pgvector_binary(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() < 4 {
        return Err(format!("vector payload too short ({} bytes)", bytes.len()));
    }
    let dim = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
    let body = &bytes[4..];
    if body.len() != dim * 4 {
        return Err(format!(
            "vector declares {} dimensions but carries {} bytes",
            dim,
            body.len()
        ));
    }

    Ok(body
        .chunks_exact(4)
        .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Decode the text form of a pgvector value: `[1,2,3]`.
pub(crate) fn decode_pgvector_text(bytes: &[u8]) -> Result<Vec<f32>, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?.trim();
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("malformed vector literal '{}'", text))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid vector element '{}': {}", part.trim(), e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_casts() {
        let plan = ColumnPlan::from_udt("price", "numeric");
        assert_eq!(plan.kind, ColumnKind::Float);
        assert_eq!(plan.select_expr(), "\"price\"::float8 AS \"price\"");

        let plan = ColumnPlan::from_udt("name", "text");
        assert_eq!(plan.select_expr(), "\"name\"");

        let plan = ColumnPlan::from_udt("uid", "uuid");
        assert_eq!(plan.kind, ColumnKind::Text);
        assert_eq!(plan.select_expr(), "\"uid\"::text AS \"uid\"");

        let plan = ColumnPlan::from_udt("scores", "_int4");
        assert_eq!(plan.kind, ColumnKind::IntArray);
        assert_eq!(plan.select_expr(), "\"scores\"::int8[] AS \"scores\"");

        let plan = ColumnPlan::from_udt("embedding", "vector");
        assert_eq!(plan.kind, ColumnKind::Vector);
        assert_eq!(plan.select_expr(), "\"embedding\"");
    }

    #[test]
    fn test_decode_pgvector_binary() {
        let mut bytes = vec![0u8, 3, 0, 0];
        for value in [1.0f32, -2.5, 0.25] {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        assert_eq!(decode_pgvector_binary(&bytes).unwrap(), vec![1.0, -2.5, 0.25]);
    }

    #[test]
    fn test_decode_pgvector_binary_length_mismatch() {
        let bytes = vec![0u8, 2, 0, 0, 0, 0, 128, 63];
        assert!(decode_pgvector_binary(&bytes).is_err());
        assert!(decode_pgvector_binary(&[0u8, 1]).is_err());
    }

    #[test]
    fn test_decode_pgvector_text() {
        assert_eq!(decode_pgvector_text(b"[1,2.5,3]").unwrap(), vec![1.0, 2.5, 3.0]);
        assert_eq!(decode_pgvector_text(b"[]").unwrap(), Vec::<f32>::new());
        assert!(decode_pgvector_text(b"1,2").is_err());
    }
}
