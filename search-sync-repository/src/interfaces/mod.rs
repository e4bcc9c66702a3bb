//! Interface definitions for the stores the pipeline talks to.
//!
//! The pipeline only depends on these traits, which allows for dependency
//! injection and in-memory implementations in tests.

mod queue_store;
mod search_index_provider;
mod source_store;

pub use queue_store::{ClaimedBatch, QueueStore};
pub use search_index_provider::{CollectionAdmin, SearchIndexProvider};
pub use source_store::SourceStore;
