//! # Search Sync Pipeline
//!
//! This crate consumes the change queue written by the database triggers and
//! applies it to the search index.
//!
//! ## Architecture
//!
//! One batch flows through these stages:
//!
//! 1. **Fetcher**: Claims pending queue entries past a cursor
//! 2. **Dedup**: Collapses entries to one effective action per record
//! 3. **Loader**: Re-reads the current source row of each non-delete action
//! 4. **Processor**: Maps fields, runs the transform hook, normalizes types
//! 5. **Writer**: Upserts and deletes documents in the index
//! 6. **Coordinator**: Commits the entries of written records or rolls back

pub mod coordinator;
pub mod dedup;
pub mod errors;
pub mod fetcher;
pub mod loader;
pub mod processor;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use coordinator::{BatchCoordinator, BatchState, CoordinatorConfig, CycleReport, SyncReport};
pub use dedup::{Deduplicator, EffectiveAction};
pub use errors::{PipelineError, RecordError};
pub use fetcher::BatchFetcher;
pub use loader::{FailedRecord, LoadResult, LoadedRecord, RecordLoader};
pub use processor::{DocumentProcessor, FieldMapper, TransformFn, TransformHook, TransformRegistry, TypeNormalizer};
pub use writer::{IndexWriter, WriteOutcome, WriteRequest, WriterConfig};
