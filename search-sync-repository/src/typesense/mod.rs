//! Typesense implementation of the search index.
//!
//! This module provides a concrete implementation of `SearchIndexProvider`
//! and `CollectionAdmin` using the Typesense HTTP API.

mod client;
mod collection_schema;

pub use client::TypesenseClient;
pub use collection_schema::{build_collection_schema, schema_differences};
