//! # Search Sync
//!
//! Main library for the PostgreSQL to Typesense search sync.
//!
//! This crate provides configuration loading, dependency wiring and the
//! `setup`, `sync` and `status` commands run by the binary.

pub mod commands;
pub mod config;

pub use config::{ConfigError, Dependencies, Settings};

use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] search_sync_pipeline::PipelineError),

    /// Database error.
    #[error("Database error: {0}")]
    StoreError(#[from] search_sync_repository::StoreError),

    /// Search engine error.
    #[error("Search error: {0}")]
    SearchError(#[from] search_sync_repository::SearchIndexError),

    /// A required service is reachable but not healthy.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SyncError {
    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
