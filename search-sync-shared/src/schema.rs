//! Table and field configuration types.
//!
//! A [`TableConfig`] describes one synchronized source (table or view) and
//! the collection it feeds. Its ordered list of [`FieldSpec`]s drives field
//! mapping, type normalization and collection creation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a target field.
///
/// `Date` and `Vector` are source-side declarations: they are stored in the
/// index as `int64` and `float[]` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Float,
    Bool,
    Geopoint,
    GeopointArray,
    StringArray,
    Int32Array,
    Int64Array,
    FloatArray,
    BoolArray,
    Object,
    ObjectArray,
    Auto,
    StringAuto,
    Date,
    Vector,
}

impl FieldType {
    /// Every accepted type tag, in the order they are reported to users.
    pub const ALL: [FieldType; 18] = [
        FieldType::String,
        FieldType::Int32,
        FieldType::Int64,
        FieldType::Float,
        FieldType::Bool,
        FieldType::Geopoint,
        FieldType::GeopointArray,
        FieldType::StringArray,
        FieldType::Int32Array,
        FieldType::Int64Array,
        FieldType::FloatArray,
        FieldType::BoolArray,
        FieldType::Object,
        FieldType::ObjectArray,
        FieldType::Auto,
        FieldType::StringAuto,
        FieldType::Date,
        FieldType::Vector,
    ];

    /// The tag as written in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Geopoint => "geopoint",
            FieldType::GeopointArray => "geopoint[]",
            FieldType::StringArray => "string[]",
            FieldType::Int32Array => "int32[]",
            FieldType::Int64Array => "int64[]",
            FieldType::FloatArray => "float[]",
            FieldType::BoolArray => "bool[]",
            FieldType::Object => "object",
            FieldType::ObjectArray => "object[]",
            FieldType::Auto => "auto",
            FieldType::StringAuto => "string*",
            FieldType::Date => "date",
            FieldType::Vector => "vector",
        }
    }

    /// The type declared to the search index for this field.
    pub fn index_type(self) -> &'static str {
        match self {
            FieldType::Date => "int64",
            FieldType::Vector => "float[]",
            other => other.as_str(),
        }
    }

    /// Whether the index type holds a sequence of values.
    pub fn is_array(self) -> bool {
        self.index_type().ends_with("[]")
    }

    /// Object-typed fields are not indexed unless asked for.
    pub fn is_object(self) -> bool {
        matches!(self, FieldType::Object | FieldType::ObjectArray)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a configured type tag is not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFieldType(pub String);

impl fmt::Display for UnknownFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid: Vec<&str> = FieldType::ALL.iter().map(|t| t.as_str()).collect();
        write!(
            f,
            "invalid type '{}'. Valid types: {}",
            self.0,
            valid.join(", ")
        )
    }
}

impl std::error::Error for UnknownFieldType {}

impl FromStr for FieldType {
    type Err = UnknownFieldType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownFieldType(s.to_string()))
    }
}

impl TryFrom<String> for FieldType {
    type Error = UnknownFieldType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_string()
    }
}

/// One target field of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Target field name in the index.
    pub name: String,
    /// Source column; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Vector dimension. Required for `vector` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_dim: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facet: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infix: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stem: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Index-side embedding configuration, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Value>,
}

impl FieldSpec {
    /// Create a field with every flag left at its default.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            source_column: None,
            field_type,
            num_dim: None,
            optional: None,
            index: None,
            sort: None,
            facet: None,
            infix: None,
            stem: None,
            store: None,
            locale: None,
            embed: None,
        }
    }

    /// Read the value from a differently named column.
    pub fn with_source_column(mut self, column: impl Into<String>) -> Self {
        self.source_column = Some(column.into());
        self
    }

    /// Set the vector dimension.
    pub fn with_num_dim(mut self, num_dim: i64) -> Self {
        self.num_dim = Some(num_dim);
        self
    }

    /// Set the optional flag explicitly.
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    /// Column the value is read from.
    pub fn source_column(&self) -> &str {
        self.source_column.as_deref().unwrap_or(&self.name)
    }

    /// Whether a record may omit this field. `id` is required by default,
    /// everything else optional.
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(self.name != "id")
    }

    /// Whether the index should index this field.
    pub fn is_indexed(&self) -> bool {
        self.index.unwrap_or(!self.field_type.is_object())
    }

    pub fn is_facet(&self) -> bool {
        self.facet.unwrap_or(false)
    }

    pub fn is_sort(&self) -> bool {
        self.sort.unwrap_or(false)
    }

    /// A field holding an embedding: `vector`, or `float[]` with a dimension.
    pub fn is_vector(&self) -> bool {
        match self.field_type {
            FieldType::Vector => true,
            FieldType::FloatArray => self.num_dim.is_some(),
            _ => false,
        }
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// Configuration of one synchronized source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Logical table or view name. Queue entries carry it as `source_name`.
    #[serde(rename = "name")]
    pub source_name: String,
    /// Target collection.
    #[serde(rename = "collection")]
    pub collection_name: String,
    /// Physical table carrying the trigger when the source is a view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_table: Option<String>,
    /// Registered transform hook applied after field mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<String>,
    /// Column identifying a row; its text form is the queue `record_id`.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sorting_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_separators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols_to_index: Option<Vec<String>>,
    /// Ordered target fields.
    #[serde(rename = "schema")]
    pub fields: Vec<FieldSpec>,
}

impl TableConfig {
    /// Create a table configuration with default options.
    pub fn new(
        source_name: impl Into<String>,
        collection_name: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            collection_name: collection_name.into(),
            reference_table: None,
            transformer: None,
            primary_key: default_primary_key(),
            default_sorting_field: None,
            token_separators: None,
            symbols_to_index: None,
            fields,
        }
    }

    /// Mark the source as a view whose changes are captured on `table`.
    pub fn with_reference_table(mut self, table: impl Into<String>) -> Self {
        self.reference_table = Some(table.into());
        self
    }

    /// Attach a named transform hook.
    pub fn with_transformer(mut self, name: impl Into<String>) -> Self {
        self.transformer = Some(name.into());
        self
    }

    /// Whether changes are captured on a different table than the one read.
    pub fn is_view_backed(&self) -> bool {
        self.reference_table.is_some()
    }

    /// Table the change trigger is installed on.
    pub fn trigger_table(&self) -> &str {
        self.reference_table.as_deref().unwrap_or(&self.source_name)
    }

    /// Name of the change trigger for this source.
    pub fn trigger_name(&self) -> String {
        match &self.reference_table {
            Some(reference) => format!("trigger_{}_to_{}_typesense", reference, self.source_name),
            None => format!("trigger_{}_to_typesense", self.source_name),
        }
    }

    /// Look up a field by target name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}
