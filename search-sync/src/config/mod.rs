//! Configuration and dependency wiring.

mod dependencies;
mod settings;

pub use dependencies::Dependencies;
pub use settings::{parse_tables, validate_tables, ConfigError, Settings, DEFAULT_CONFIG_PATH};
