//! # Search Sync Shared
//!
//! Types shared by every crate of the search sync system: queue entries,
//! table and field configuration, and the document shapes that flow from
//! the source database to the search index.

pub mod document;
pub mod queue;
pub mod schema;

pub use document::{IndexDocument, RawDocument, SourceRow, SourceValue};
pub use queue::{Operation, QueueEntry, UnknownOperation};
pub use schema::{FieldSpec, FieldType, TableConfig, UnknownFieldType};
