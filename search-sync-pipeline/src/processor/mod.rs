//! Processor module for the search sync pipeline.
//!
//! Turns a loaded source row into an index document: field mapping, then
//! the table's transform hook, then type normalization.

mod builtins;
mod mapper;
mod normalizer;
mod transform;

use std::collections::HashMap;

pub use builtins::{transform_product, transform_tender, transform_user};
pub use mapper::FieldMapper;
pub use normalizer::TypeNormalizer;
pub use transform::{TransformFn, TransformHook, TransformRegistry};

use crate::errors::{PipelineError, RecordError};
use search_sync_shared::{IndexDocument, SourceRow, TableConfig};

struct PreparedTable {
    table: TableConfig,
    hook: Option<TransformHook>,
}

/// Builds index documents for every configured source.
pub struct DocumentProcessor {
    tables: HashMap<String, PreparedTable>,
}

impl DocumentProcessor {
    /// Prepare `tables`, resolving each named transformer in `registry`.
    ///
    /// An unknown transformer is a configuration error; nothing is processed
    /// until every hook resolves.
    pub fn new(tables: &[TableConfig], registry: &TransformRegistry) -> Result<Self, PipelineError> {
        let mut prepared = HashMap::with_capacity(tables.len());

        for table in tables {
            let hook = match &table.transformer {
                Some(name) => Some(registry.resolve(name).ok_or_else(|| {
                    PipelineError::config(format!(
                        "Unknown transformer '{}' for table '{}'. Registered: {}",
                        name,
                        table.source_name,
                        registry.names().join(", ")
                    ))
                })?),
                None => None,
            };

            prepared.insert(
                table.source_name.clone(),
                PreparedTable {
                    table: table.clone(),
                    hook,
                },
            );
        }

        Ok(Self { tables: prepared })
    }

    /// Configuration of `source_name`.
    pub fn table(&self, source_name: &str) -> Option<&TableConfig> {
        self.tables.get(source_name).map(|p| &p.table)
    }

    /// Build the index document for one record.
    pub fn process(
        &self,
        record_id: &str,
        source_name: &str,
        row: &SourceRow,
    ) -> Result<IndexDocument, RecordError> {
        let prepared = self.tables.get(source_name).ok_or_else(|| {
            RecordError::SchemaValidation(format!(
                "no table configuration for source '{}'",
                source_name
            ))
        })?;

        let document = FieldMapper::map(row, &prepared.table.fields)?;
        let document = match &prepared.hook {
            Some(hook) => hook.apply(document)?,
            None => document,
        };

        TypeNormalizer::normalize(record_id, document, &prepared.table.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use search_sync_shared::{FieldSpec, FieldType, RawDocument, SourceValue};
    use serde_json::{json, Value};

    fn products() -> TableConfig {
        TableConfig::new(
            "products",
            "products",
            vec![
                FieldSpec::new("id", FieldType::String),
                FieldSpec::new("product_name", FieldType::String),
                FieldSpec::new("price", FieldType::Float),
                FieldSpec::new("is_on_sale", FieldType::Bool),
                FieldSpec::new("tags", FieldType::StringArray),
                FieldSpec::new("created_at", FieldType::Date),
            ],
        )
        .with_transformer("transformers.transform_product")
    }

    #[test]
    fn test_process_maps_transforms_and_normalizes() {
        let processor = DocumentProcessor::new(&[products()], &TransformRegistry::with_builtins()).unwrap();

        let mut row = SourceRow::new();
        row.insert("id".to_string(), SourceValue::Int(7));
        row.insert("name".to_string(), SourceValue::from("Desk Lamp"));
        row.insert("price".to_string(), SourceValue::Float(12.5));
        row.insert("tags".to_string(), SourceValue::from("home,desk"));
        row.insert(
            "created_at".to_string(),
            SourceValue::Timestamp(Utc.with_ymd_and_hms(2025, 11, 22, 10, 30, 0).unwrap()),
        );

        let document = processor.process("7", "products", &row).unwrap();

        assert_eq!(
            Value::Object(document),
            json!({
                "id": "7",
                "product_name": "Desk Lamp",
                "price": 12.5,
                "is_on_sale": false,
                "tags": ["home", "desk"],
                "created_at": 1763807400
            })
        );
    }

    #[test]
    fn test_hooks_see_native_values() {
        let mut registry = TransformRegistry::new();
        registry.register("check_native", |doc: RawDocument| {
            if matches!(doc.get("created_at"), Some(SourceValue::Timestamp(_))) {
                Ok(doc)
            } else {
                Err("expected a native timestamp".to_string())
            }
        });
        let table = TableConfig::new(
            "events",
            "events",
            vec![FieldSpec::new("created_at", FieldType::Date)],
        )
        .with_transformer("check_native");
        let processor = DocumentProcessor::new(&[table], &registry).unwrap();

        let mut row = SourceRow::new();
        row.insert("created_at".to_string(), SourceValue::Timestamp(Utc::now()));

        assert!(processor.process("1", "events", &row).is_ok());
    }

    #[test]
    fn test_unknown_transformer_is_config_error() {
        let table = products().with_transformer("transformers.missing");
        let err = DocumentProcessor::new(&[table], &TransformRegistry::with_builtins())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ConfigError(msg) if msg.contains("transformers.missing")));
    }

    #[test]
    fn test_unconfigured_source_is_record_error() {
        let processor = DocumentProcessor::new(&[], &TransformRegistry::new()).unwrap();
        let err = processor.process("1", "orders", &SourceRow::new()).unwrap_err();
        assert!(matches!(err, RecordError::SchemaValidation(_)));
    }
}
