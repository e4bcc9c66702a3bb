//! Typesense collection schemas.
//!
//! This module builds the collection schema for a configured table and
//! compares it against a collection that already exists.

use serde_json::{json, Map, Value};

use crate::types::CollectionInfo;
use search_sync_shared::{FieldSpec, TableConfig};

/// Build the collection schema for `table`.
///
/// Every field carries its name, index type and the `optional`, `facet`,
/// `index` and `sort` flags with defaults applied. Other settings are only
/// sent when configured.
pub fn build_collection_schema(table: &TableConfig) -> Value {
    let fields: Vec<Value> = table.fields.iter().map(field_schema).collect();

    let mut schema = Map::new();
    schema.insert("name".to_string(), json!(table.collection_name));
    schema.insert("fields".to_string(), Value::Array(fields));

    if let Some(field) = &table.default_sorting_field {
        schema.insert("default_sorting_field".to_string(), json!(field));
    }
    if let Some(separators) = &table.token_separators {
        schema.insert("token_separators".to_string(), json!(separators));
    }
    if let Some(symbols) = &table.symbols_to_index {
        schema.insert("symbols_to_index".to_string(), json!(symbols));
    }

    Value::Object(schema)
}

fn field_schema(field: &FieldSpec) -> Value {
    let mut schema = Map::new();
    schema.insert("name".to_string(), json!(field.name));
    schema.insert("type".to_string(), json!(field.field_type.index_type()));
    schema.insert("optional".to_string(), json!(field.is_optional()));
    schema.insert("facet".to_string(), json!(field.is_facet()));
    schema.insert("index".to_string(), json!(field.is_indexed()));
    schema.insert("sort".to_string(), json!(field.is_sort()));

    if let Some(infix) = field.infix {
        schema.insert("infix".to_string(), json!(infix));
    }
    if let Some(locale) = field.locale.as_deref().filter(|l| !l.is_empty()) {
        schema.insert("locale".to_string(), json!(locale));
    }
    if let Some(stem) = field.stem {
        schema.insert("stem".to_string(), json!(stem));
    }
    if let Some(store) = field.store {
        schema.insert("store".to_string(), json!(store));
    }
    if let Some(embed) = &field.embed {
        schema.insert("embed".to_string(), embed.clone());
    }
    if let Some(num_dim) = field.num_dim {
        schema.insert("num_dim".to_string(), json!(num_dim));
    }

    Value::Object(schema)
}

/// Describe how an existing collection differs from the desired schema.
///
/// Only settings the desired schema specifies are compared; the engine adds
/// defaults of its own that are not differences.
pub fn schema_differences(existing: &CollectionInfo, desired: &Value) -> Vec<String> {
    let mut differences = Vec::new();
    let desired_fields = desired["fields"].as_array().cloned().unwrap_or_default();

    for wanted in &desired_fields {
        let Some(name) = wanted["name"].as_str() else {
            continue;
        };

        let Some(actual) = existing
            .fields
            .iter()
            .find(|field| field["name"].as_str() == Some(name))
        else {
            differences.push(format!("field '{}' is missing from the collection", name));
            continue;
        };

        if let Some(settings) = wanted.as_object() {
            for (key, value) in settings {
                if key == "name" || key == "embed" {
                    continue;
                }
                if actual.get(key) != Some(value) {
                    differences.push(format!(
                        "field '{}': {} is {} in the collection but {} in the configuration",
                        name,
                        key,
                        actual.get(key).unwrap_or(&Value::Null),
                        value
                    ));
                }
            }
        }
    }

    for actual in &existing.fields {
        let Some(name) = actual["name"].as_str() else {
            continue;
        };
        let configured = desired_fields
            .iter()
            .any(|field| field["name"].as_str() == Some(name));
        if !configured {
            differences.push(format!("field '{}' is not in the configuration", name));
        }
    }

    differences
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_sync_shared::FieldType;

    fn products() -> TableConfig {
        let mut table = TableConfig::new(
            "products",
            "products",
            vec![
                FieldSpec::new("id", FieldType::String),
                FieldSpec::new("name", FieldType::String),
                FieldSpec::new("created_at", FieldType::Date),
                FieldSpec::new("embedding", FieldType::Vector).with_num_dim(3),
                FieldSpec::new("attributes", FieldType::Object),
            ],
        );
        table.default_sorting_field = Some("created_at".to_string());
        table
    }

    #[test]
    fn test_collection_schema_structure() {
        let schema = build_collection_schema(&products());

        assert_eq!(schema["name"], "products");
        assert_eq!(schema["default_sorting_field"], "created_at");
        assert!(schema.get("token_separators").is_none());

        let fields = schema["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 5);

        // id is required, everything else optional
        assert_eq!(fields[0]["optional"], false);
        assert_eq!(fields[1]["optional"], true);

        assert_eq!(fields[2]["type"], "int64");
        assert_eq!(fields[3]["type"], "float[]");
        assert_eq!(fields[3]["num_dim"], 3);
        assert_eq!(fields[4]["index"], false);
        assert!(fields[1].get("locale").is_none());
    }

    #[test]
    fn test_schema_differences() {
        let desired = build_collection_schema(&products());
        let mut fields: Vec<Value> = desired["fields"].as_array().unwrap().clone();
        fields.remove(4);
        fields[1]["facet"] = json!(true);
        fields.push(json!({"name": "legacy", "type": "string"}));

        let existing = CollectionInfo {
            name: "products".to_string(),
            num_documents: 0,
            fields,
        };

        let differences = schema_differences(&existing, &desired);
        assert_eq!(differences.len(), 3);
        assert!(differences.iter().any(|d| d.contains("'attributes' is missing")));
        assert!(differences.iter().any(|d| d.contains("'name': facet")));
        assert!(differences.iter().any(|d| d.contains("'legacy' is not in the configuration")));
    }

    #[test]
    fn test_matching_collection_has_no_differences() {
        let desired = build_collection_schema(&products());
        let existing = CollectionInfo {
            name: "products".to_string(),
            num_documents: 10,
            fields: desired["fields"].as_array().unwrap().clone(),
        };
        assert!(schema_differences(&existing, &desired).is_empty());
    }
}
