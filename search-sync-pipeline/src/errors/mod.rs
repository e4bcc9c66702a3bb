//! Error types for the search sync pipeline.
//!
//! [`PipelineError`] aborts a whole batch; [`RecordError`] skips one record
//! and leaves its queue entries in place.

use search_sync_repository::{SearchIndexError, StoreError};
use thiserror::Error;

/// Batch-wide failures. The current batch is rolled back.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source store or the search index is unreachable or timed out.
    #[error("Connectivity error: {0}")]
    ConnectivityError(String),

    /// The queue store rejected an operation.
    #[error("Queue error: {0}")]
    QueueError(String),

    /// The search index rejected an operation as a whole.
    #[error("Index error: {0}")]
    IndexError(String),

    /// The pipeline was assembled from an invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl PipelineError {
    /// Create a connectivity error.
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::ConnectivityError(msg.into())
    }

    /// Create a queue error.
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::QueueError(msg.into())
    }

    /// Create an index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::IndexError(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the failure is a lost connection or a timeout.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::ConnectivityError(_))
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        if err.is_connectivity() {
            Self::ConnectivityError(err.to_string())
        } else {
            Self::QueueError(err.to_string())
        }
    }
}

impl From<SearchIndexError> for PipelineError {
    fn from(err: SearchIndexError) -> Self {
        if err.is_connectivity() {
            Self::ConnectivityError(err.to_string())
        } else {
            Self::IndexError(err.to_string())
        }
    }
}

/// Failures confined to one record. The record is skipped and retried later.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// A required field is missing, or the record has no table configuration.
    #[error("Schema validation error: {0}")]
    SchemaValidation(String),

    /// The source row could not be read.
    #[error("Load error: {0}")]
    Load(String),

    /// The transform hook failed.
    #[error("Transform error: {0}")]
    Transform(String),

    /// A value could not be converted to its declared type.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The index rejected the document or the delete.
    #[error("Write error: {0}")]
    Write(String),
}

impl RecordError {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaValidation(_) => "schema_validation",
            Self::Load(_) => "load",
            Self::Transform(_) => "transform",
            Self::Conversion(_) => "conversion",
            Self::Write(_) => "write",
        }
    }
}
