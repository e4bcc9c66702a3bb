//! Settings loading: table definitions from YAML, connections from the environment.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use search_sync_pipeline::TransformRegistry;
use search_sync_repository::{is_plain_identifier, PostgresConfig, TypesenseConfig};
use search_sync_shared::{FieldType, TableConfig};

/// Default table configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

const DEFAULT_POSTGRES_PORT: u16 = 5432;
const DEFAULT_TYPESENSE_PORT: u16 = 8108;
const DEFAULT_TYPESENSE_PROTOCOL: &str = "http";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Errors raised while loading or validating settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variable '{0}'. Set it in your .env file.")]
    MissingEnv(String),

    #[error("Invalid value '{value}' for environment variable '{name}'")]
    InvalidEnv { name: String, value: String },

    #[error("Invalid table configuration: {0}")]
    InvalidTable(String),

    #[error("Unknown transformer '{transformer}' for table '{table}'. Registered: {registered}")]
    UnknownTransformer {
        table: String,
        transformer: String,
        registered: String,
    },

    #[error("No tables match {requested:?}. Available tables: {available}")]
    NoMatchingTables {
        requested: Vec<String>,
        available: String,
    },
}

impl ConfigError {
    fn invalid_table(msg: impl Into<String>) -> Self {
        Self::InvalidTable(msg.into())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    tables: Option<Vec<TableConfig>>,
}

/// Everything the binary needs to connect and synchronize.
#[derive(Debug, Clone)]
pub struct Settings {
    pub postgres: PostgresConfig,
    pub typesense: TypesenseConfig,
    pub tables: Vec<TableConfig>,
}

impl Settings {
    /// Load `path` and the process environment (after `.env`).
    pub fn load(path: &Path, registry: &TransformRegistry) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let yaml = match fs::read_to_string(path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::FileNotFound(path.display().to_string()))
            }
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        Self::from_sources(&yaml, registry, |name| env::var(name).ok())
    }

    /// Build settings from YAML text and an environment lookup.
    pub fn from_sources<F>(yaml: &str, registry: &TransformRegistry, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tables = parse_tables(yaml)?;
        validate_tables(&tables, registry)?;

        let timeout = Duration::from_secs(parse_or(&lookup, "SYNC_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?);

        let mut postgres = PostgresConfig::new(
            required(&lookup, "POSTGRES_HOST")?,
            parse_or(&lookup, "POSTGRES_PORT", DEFAULT_POSTGRES_PORT)?,
            required(&lookup, "POSTGRES_USER")?,
            required(&lookup, "POSTGRES_PASSWORD")?,
            required(&lookup, "POSTGRES_DBNAME")?,
        );
        postgres.timeout = timeout;

        let mut typesense = TypesenseConfig::new(
            lookup("TYPESENSE_PROTOCOL").unwrap_or_else(|| DEFAULT_TYPESENSE_PROTOCOL.to_string()),
            required(&lookup, "TYPESENSE_HOST")?,
            parse_or(&lookup, "TYPESENSE_PORT", DEFAULT_TYPESENSE_PORT)?,
            required(&lookup, "TYPESENSE_API_KEY")?,
        );
        typesense.timeout = timeout;

        debug!(tables = tables.len(), "Settings loaded");
        Ok(Self {
            postgres,
            typesense,
            tables,
        })
    }

    /// The configured tables named in `only`, in configuration order. An
    /// empty filter selects every table.
    pub fn select_tables(&self, only: &[String]) -> Result<Vec<TableConfig>, ConfigError> {
        if only.is_empty() {
            return Ok(self.tables.clone());
        }

        let selected: Vec<TableConfig> = self
            .tables
            .iter()
            .filter(|t| only.iter().any(|name| name == &t.source_name))
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(ConfigError::NoMatchingTables {
                requested: only.to_vec(),
                available: self
                    .tables
                    .iter()
                    .map(|t| t.source_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        Ok(selected)
    }
}

/// Parse the `tables` list of a configuration file.
pub fn parse_tables(yaml: &str) -> Result<Vec<TableConfig>, ConfigError> {
    let file: ConfigFile = serde_yaml::from_str(yaml)?;
    match file.tables {
        Some(tables) if !tables.is_empty() => Ok(tables),
        _ => Err(ConfigError::invalid_table(
            "No tables defined in the configuration or 'tables' is not a list",
        )),
    }
}

/// Check identifiers, vector dimensions, embed settings and transformers.
pub fn validate_tables(tables: &[TableConfig], registry: &TransformRegistry) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for (i, table) in tables.iter().enumerate() {
        let label = format!("Table {} ('{}')", i + 1, table.source_name);

        if !is_plain_identifier(&table.source_name) {
            return Err(ConfigError::invalid_table(format!(
                "{}: name must be a plain SQL identifier",
                label
            )));
        }
        if !seen.insert(table.source_name.as_str()) {
            return Err(ConfigError::invalid_table(format!("{}: configured more than once", label)));
        }
        if table.collection_name.trim().is_empty() {
            return Err(ConfigError::invalid_table(format!("{}: 'collection' must not be empty", label)));
        }
        if let Some(reference) = &table.reference_table {
            if !is_plain_identifier(reference) {
                return Err(ConfigError::invalid_table(format!(
                    "{}: 'reference_table' must be a non-empty plain SQL identifier",
                    label
                )));
            }
        }
        if !is_plain_identifier(&table.primary_key) {
            return Err(ConfigError::invalid_table(format!(
                "{}: 'primary_key' must be a plain SQL identifier",
                label
            )));
        }
        if let Some(transformer) = &table.transformer {
            if !registry.contains(transformer) {
                return Err(ConfigError::UnknownTransformer {
                    table: table.source_name.clone(),
                    transformer: transformer.clone(),
                    registered: registry.names().join(", "),
                });
            }
        }

        for (j, field) in table.fields.iter().enumerate() {
            let field_label = format!("{}, schema field {} ('{}')", label, j + 1, field.name);

            if field.name.trim().is_empty() {
                return Err(ConfigError::invalid_table(format!("{}: 'name' must not be empty", field_label)));
            }
            if !is_plain_identifier(field.source_column()) {
                return Err(ConfigError::invalid_table(format!(
                    "{}: source column '{}' must be a plain SQL identifier",
                    field_label,
                    field.source_column()
                )));
            }
            match field.num_dim {
                Some(n) if n <= 0 => {
                    return Err(ConfigError::invalid_table(format!(
                        "{}: 'num_dim' must be a positive integer",
                        field_label
                    )))
                }
                None if field.field_type == FieldType::Vector => {
                    return Err(ConfigError::invalid_table(format!(
                        "{}: 'num_dim' is required for vector fields",
                        field_label
                    )))
                }
                _ => {}
            }
            if let Some(embed) = &field.embed {
                if embed.get("from").is_none() {
                    return Err(ConfigError::invalid_table(format!(
                        "{}: 'embed.from' is required for embedding fields",
                        field_label
                    )));
                }
            }
        }
    }

    Ok(())
}

fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONFIG: &str = r#"
tables:
  - name: products
    collection: products
    transformer: transformers.transform_product
    schema:
      - name: id
        type: string
      - name: product_name
        type: string
      - name: price
        type: float
        sort: true
      - name: embedding
        type: vector
        num_dim: 3
  - name: product_search_view
    collection: product_search
    reference_table: products
    schema:
      - name: id
        type: string
      - name: title
        source_column: name
        type: string
"#;

    fn env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("POSTGRES_HOST", "localhost"),
            ("POSTGRES_USER", "sync"),
            ("POSTGRES_PASSWORD", "secret"),
            ("POSTGRES_DBNAME", "shop"),
            ("TYPESENSE_HOST", "localhost"),
            ("TYPESENSE_API_KEY", "xyz"),
        ])
    }

    fn load(yaml: &str, env: &HashMap<&'static str, &'static str>) -> Result<Settings, ConfigError> {
        Settings::from_sources(yaml, &TransformRegistry::with_builtins(), |name| {
            env.get(name).map(|v| v.to_string())
        })
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = load(CONFIG, &env()).unwrap();

        assert_eq!(settings.tables.len(), 2);
        assert_eq!(settings.postgres.port, 5432);
        assert_eq!(settings.typesense.port, 8108);
        assert_eq!(settings.typesense.protocol, "http");
        assert_eq!(settings.postgres.timeout, Duration::from_secs(10));

        let view = &settings.tables[1];
        assert_eq!(view.reference_table.as_deref(), Some("products"));
        assert_eq!(view.primary_key, "id");
        assert_eq!(view.fields[1].source_column(), "name");
    }

    #[test]
    fn test_missing_environment_variable() {
        let mut env = env();
        env.remove("TYPESENSE_API_KEY");

        let err = load(CONFIG, &env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "TYPESENSE_API_KEY"));
    }

    #[test]
    fn test_invalid_port() {
        let mut env = env();
        env.insert("POSTGRES_PORT", "five");

        assert!(matches!(load(CONFIG, &env).unwrap_err(), ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_empty_tables_rejected() {
        assert!(matches!(
            load("tables: []", &env()).unwrap_err(),
            ConfigError::InvalidTable(_)
        ));
        assert!(matches!(
            load("other: 1", &env()).unwrap_err(),
            ConfigError::InvalidTable(_)
        ));
    }

    #[test]
    fn test_invalid_field_type_rejected() {
        let yaml = "tables:\n  - name: t\n    collection: t\n    schema:\n      - name: id\n        type: uuid\n";
        let err = load(yaml, &env()).unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(e) if e.to_string().contains("invalid type 'uuid'")));
    }

    #[test]
    fn test_vector_requires_dimension() {
        let yaml = "tables:\n  - name: t\n    collection: t\n    schema:\n      - name: e\n        type: vector\n";
        let err = load(yaml, &env()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTable(msg) if msg.contains("num_dim")));
    }

    #[test]
    fn test_embed_requires_from() {
        let yaml = "tables:\n  - name: t\n    collection: t\n    schema:\n      - name: e\n        type: float[]\n        embed:\n          model_config: {}\n";
        let err = load(yaml, &env()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTable(msg) if msg.contains("embed.from")));
    }

    #[test]
    fn test_unsafe_identifier_rejected() {
        let yaml = "tables:\n  - name: \"t; drop table x\"\n    collection: t\n    schema: []\n";
        assert!(matches!(load(yaml, &env()).unwrap_err(), ConfigError::InvalidTable(_)));
    }

    #[test]
    fn test_unknown_transformer() {
        let yaml = "tables:\n  - name: t\n    collection: t\n    transformer: transformers.nope\n    schema: []\n";
        assert!(matches!(
            load(yaml, &env()).unwrap_err(),
            ConfigError::UnknownTransformer { .. }
        ));
    }

    #[test]
    fn test_select_tables() {
        let settings = load(CONFIG, &env()).unwrap();

        assert_eq!(settings.select_tables(&[]).unwrap().len(), 2);

        let selected = settings.select_tables(&["product_search_view".to_string()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].collection_name, "product_search");

        let err = settings.select_tables(&["orders".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::NoMatchingTables { available, .. } if available == "products, product_search_view"));
    }
}
