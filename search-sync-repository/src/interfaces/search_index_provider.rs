//! Search index provider trait definitions.
//!
//! This module defines the abstract interface for search index operations,
//! allowing for different backend implementations and mock implementations
//! in tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SearchIndexError;
use crate::types::{BatchOperationSummary, CollectionInfo};
use search_sync_shared::IndexDocument;

/// Abstracts the document write side of the search index.
///
/// Implementations are injected into the index writer to enable dependency
/// injection and easy testing with mock implementations.
///
/// Whole-call failures are returned as `Err`; failures of individual documents
/// are reported in the returned [`BatchOperationSummary`].
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    /// Create or replace documents, keyed by their `id` field.
    ///
    /// Upserting the same document twice leaves the same stored state as
    /// upserting it once.
    ///
    /// # Arguments
    ///
    /// * `collection` - Target collection
    /// * `documents` - Documents to upsert, each carrying an `id`
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOperationSummary)` - One result per document, in input order
    /// * `Err(SearchIndexError)` - If the request failed as a whole
    async fn upsert_documents(
        &self,
        collection: &str,
        documents: &[IndexDocument],
    ) -> Result<BatchOperationSummary, SearchIndexError>;

    /// Delete documents by id.
    ///
    /// Deleting a document that does not exist is a success.
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOperationSummary)` - One result per id, in input order
    /// * `Err(SearchIndexError)` - If the engine became unreachable
    async fn delete_documents(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<BatchOperationSummary, SearchIndexError>;

    /// Check if the search engine is healthy and reachable.
    async fn health_check(&self) -> Result<bool, SearchIndexError>;
}

/// Collection administration, used by setup and status reporting.
#[async_trait]
pub trait CollectionAdmin: Send + Sync {
    /// List every collection on the engine.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, SearchIndexError>;

    /// Retrieve one collection, `None` when it does not exist.
    async fn retrieve_collection(
        &self,
        name: &str,
    ) -> Result<Option<CollectionInfo>, SearchIndexError>;

    /// Create a collection from a full schema document.
    async fn create_collection(&self, schema: &Value) -> Result<(), SearchIndexError>;

    /// Drop a collection and all of its documents.
    async fn delete_collection(&self, name: &str) -> Result<(), SearchIndexError>;
}
