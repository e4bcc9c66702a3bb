//! Store error types.
//!
//! This module defines the error types that can occur while talking to the
//! source database, which holds both the queue and the synchronized rows.

use thiserror::Error;

/// Errors that can occur during queue store and source store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to reach the database or lost the connection.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// An operation did not complete within its time bound.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Query execution failed.
    #[error("Query error: {0}")]
    QueryError(String),

    /// A returned value could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// A table, view or queue object does not exist.
    #[error("Missing database object: {0}")]
    MissingObject(String),
}

impl StoreError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryError(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Create a missing object error.
    pub fn missing_object(msg: impl Into<String>) -> Self {
        Self::MissingObject(msg.into())
    }

    /// Whether the failure means the store itself is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::ConnectionError(err.to_string()),
            sqlx::Error::PoolTimedOut => Self::Timeout(err.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // query_canceled: statement_timeout / lock_timeout
                Some("57014") | Some("55P03") => Self::Timeout(err.to_string()),
                Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                    Self::ConnectionError(err.to_string())
                }
                Some("42P01") => Self::MissingObject(err.to_string()),
                _ => Self::QueryError(err.to_string()),
            },
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnNotFound(_) => Self::DecodeError(err.to_string()),
            _ => Self::QueryError(err.to_string()),
        }
    }
}
