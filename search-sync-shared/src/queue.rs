//! Queue entry types.
//!
//! A queue entry is one pending change captured by a database trigger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of change a queue entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Row was inserted.
    Insert,
    /// Row was updated.
    Update,
    /// Row was deleted.
    Delete,
}

impl Operation {
    /// Rank used when several entries for one record meet in a batch.
    ///
    /// `DELETE > UPDATE > INSERT`.
    pub fn priority(self) -> u8 {
        match self {
            Operation::Insert => 0,
            Operation::Update => 1,
            Operation::Delete => 2,
        }
    }

    /// The operation as stored in the queue table.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    /// Whether this operation removes the document from the index.
    pub fn is_delete(self) -> bool {
        matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored operation string is not one of the known kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown queue operation '{}'", self.0)
    }
}

impl std::error::Error for UnknownOperation {}

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            _ => Err(UnknownOperation(s.to_string())),
        }
    }
}

/// One pending change in the queue store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Store-assigned, monotonically increasing identifier.
    pub sequence: i64,
    /// Primary key of the affected row, stringified.
    pub record_id: String,
    /// Logical table or view the change belongs to.
    pub source_name: String,
    /// Captured operation.
    pub operation: Operation,
    /// When the change was captured. Informational only.
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        sequence: i64,
        record_id: impl Into<String>,
        source_name: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            sequence,
            record_id: record_id.into(),
            source_name: source_name.into(),
            operation,
            enqueued_at: Utc::now(),
        }
    }

    /// The `(record_id, source_name)` identity of the logical record.
    pub fn record_key(&self) -> (&str, &str) {
        (&self.record_id, &self.source_name)
    }
}
