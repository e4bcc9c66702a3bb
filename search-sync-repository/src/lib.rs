//! # Search Sync Repository
//!
//! This crate provides traits and implementations for the stores the sync
//! pipeline talks to: the queue of pending changes and the synchronized rows
//! (PostgreSQL), and the search index (Typesense).

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod postgres;
pub mod types;
pub mod typesense;

pub use config::{PostgresConfig, TypesenseConfig};
pub use errors::{SearchIndexError, StoreError};
pub use interfaces::{ClaimedBatch, CollectionAdmin, QueueStore, SearchIndexProvider, SourceStore};
pub use postgres::{is_plain_identifier, CaptureSetupReport, PostgresStore, QUEUE_TABLE};
pub use types::{
    BatchOperationResult, BatchOperationSummary, CollectionInfo, FetchRequest, QueueBreakdown,
    QueueStats, RelationKind,
};
pub use typesense::{build_collection_schema, schema_differences, TypesenseClient};
