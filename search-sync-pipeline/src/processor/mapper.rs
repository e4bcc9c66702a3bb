//! Field mapper: source columns to target field names.

use std::collections::HashSet;

use crate::errors::RecordError;
use search_sync_shared::{FieldSpec, RawDocument, SourceRow};

/// Renames source columns to target fields per the field list.
pub struct FieldMapper;

impl FieldMapper {
    /// Build the raw document for `row`.
    ///
    /// Each field reads its `source_column`. Optional fields missing from the
    /// row are left out; a missing required field fails the record. Columns
    /// no field reads are carried over under their own name so transform
    /// hooks can use them; the normalizer drops whatever stays unmapped.
    pub fn map(row: &SourceRow, fields: &[FieldSpec]) -> Result<RawDocument, RecordError> {
        let claimed: HashSet<&str> = fields
            .iter()
            .flat_map(|f| [f.source_column(), f.name.as_str()])
            .collect();
        let mut document: RawDocument = row
            .iter()
            .filter(|(column, _)| !claimed.contains(column.as_str()))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();

        for field in fields {
            match row.get(field.source_column()) {
                Some(value) => {
                    document.insert(field.name.clone(), value.clone());
                }
                None if field.is_optional() => {}
                None => {
                    return Err(RecordError::SchemaValidation(format!(
                        "required field '{}' (column '{}') is missing from the source row",
                        field.name,
                        field.source_column()
                    )));
                }
            }
        }

        Ok(document)
    }
}
