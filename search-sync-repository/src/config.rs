//! Connection settings for the source database and the search engine.

use std::time::Duration;

use url::Url;

use crate::errors::SearchIndexError;

/// Default bound on every network call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL connection settings.
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Bound on connection acquisition and on each statement.
    pub timeout: Duration,
}

impl PostgresConfig {
    /// Settings with default pool size and timeout.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            dbname: dbname.into(),
            max_connections: 10,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("dbname", &self.dbname)
            .field("max_connections", &self.max_connections)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Typesense connection settings.
#[derive(Clone)]
pub struct TypesenseConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub api_key: String,
    /// Bound on each HTTP request.
    pub timeout: Duration,
}

impl TypesenseConfig {
    /// Settings with the default timeout.
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            api_key: api_key.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Base URL of the node, e.g. `http://localhost:8108/`.
    pub fn base_url(&self) -> Result<Url, SearchIndexError> {
        Url::parse(&format!("{}://{}:{}/", self.protocol, self.host, self.port))
            .map_err(|e| SearchIndexError::connection(format!("Invalid Typesense URL: {}", e)))
    }
}

impl std::fmt::Debug for TypesenseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypesenseConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
