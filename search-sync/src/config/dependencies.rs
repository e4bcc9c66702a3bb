//! Dependency initialization and wiring for the search sync.

use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::SyncError;
use search_sync_pipeline::{BatchCoordinator, CoordinatorConfig, TransformRegistry};
use search_sync_repository::{PostgresStore, SearchIndexProvider, TypesenseClient};
use search_sync_shared::TableConfig;

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// Queue and source store.
    pub store: Arc<PostgresStore>,
    /// Search index and collection admin.
    pub index: Arc<TypesenseClient>,
    /// Transform hooks available to table configurations.
    pub registry: TransformRegistry,
}

impl Dependencies {
    /// Connect to PostgreSQL and build the Typesense client.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(SyncError)` - If the database cannot be reached or the
    ///   Typesense settings are invalid
    pub async fn new(settings: &Settings, registry: TransformRegistry) -> Result<Self, SyncError> {
        info!(
            postgres_host = %settings.postgres.host,
            postgres_db = %settings.postgres.dbname,
            typesense_host = %settings.typesense.host,
            typesense_port = settings.typesense.port,
            "Initializing dependencies"
        );

        let store = PostgresStore::connect(&settings.postgres).await?;
        info!("PostgreSQL connection established");

        let index = TypesenseClient::new(&settings.typesense)?;

        Ok(Self {
            store: Arc::new(store),
            index: Arc::new(index),
            registry,
        })
    }

    /// Fail unless Typesense reports itself healthy.
    pub async fn verify_index(&self) -> Result<(), SyncError> {
        if !self.index.health_check().await? {
            return Err(SyncError::unavailable("Typesense node is not healthy"));
        }
        info!("Typesense connection verified");
        Ok(())
    }

    /// Assemble a batch coordinator for `tables`.
    pub fn coordinator(
        &self,
        tables: &[TableConfig],
        config: CoordinatorConfig,
    ) -> Result<BatchCoordinator, SyncError> {
        let coordinator = BatchCoordinator::new(
            self.store.clone(),
            self.store.clone(),
            self.index.clone(),
            tables,
            &self.registry,
            config,
        )?;
        Ok(coordinator)
    }

    /// Close pooled database connections.
    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}
