//! Request and response types for store and index operations.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::SearchIndexError;
use search_sync_shared::Operation;

/// Parameters of one batch fetch against the queue store.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Only entries whose source is one of these are returned.
    pub source_names: Vec<String>,
    /// Only entries with a strictly greater sequence are returned.
    pub after_sequence: Option<i64>,
    /// Upper bound on the number of entries.
    pub limit: usize,
}

impl FetchRequest {
    /// Fetch up to `limit` entries for the given sources.
    pub fn new(source_names: Vec<String>, limit: usize) -> Self {
        Self {
            source_names,
            after_sequence: None,
            limit,
        }
    }

    /// Only return entries queued after `sequence`.
    pub fn after(mut self, sequence: Option<i64>) -> Self {
        self.after_sequence = sequence;
        self
    }
}

/// Result of a batch operation for a single document.
///
/// This struct represents the outcome of a single operation within a batch (one
/// upsert or one delete). It indicates whether the operation succeeded and
/// includes error details if it failed.
#[derive(Debug, Clone)]
pub struct BatchOperationResult {
    /// The document identifier (the queue `record_id`).
    pub document_id: String,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error if the operation failed.
    pub error: Option<SearchIndexError>,
}

impl BatchOperationResult {
    /// A successful outcome.
    pub fn succeeded(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            success: true,
            error: None,
        }
    }

    /// A failed outcome.
    pub fn failed(document_id: impl Into<String>, error: SearchIndexError) -> Self {
        Self {
            document_id: document_id.into(),
            success: false,
            error: Some(error),
        }
    }
}

/// Summary of a batch operation containing aggregate statistics and individual results.
///
/// This struct provides a complete overview of a bulk operation, including the total
/// number of items processed, how many succeeded and failed, and detailed results for
/// each individual item. This allows callers to handle partial failures gracefully.
#[derive(Debug, Clone, Default)]
pub struct BatchOperationSummary {
    /// Total number of items in the batch.
    pub total: usize,
    /// Number of successful operations.
    pub succeeded: usize,
    /// Number of failed operations.
    pub failed: usize,
    /// Individual results for each item.
    pub results: Vec<BatchOperationResult>,
}

impl BatchOperationSummary {
    /// Build a summary from individual results.
    pub fn from_results(results: Vec<BatchOperationResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

/// A collection as reported by the search engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub num_documents: u64,
    /// Field definitions as returned by the engine.
    pub fields: Vec<Value>,
}

/// Pending entry counts for one `(source, operation)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBreakdown {
    pub source_name: String,
    pub operation: Operation,
    pub count: i64,
}

/// Aggregate view of the queue store.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub breakdown: Vec<QueueBreakdown>,
}

/// Kind of relation a configured source name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    View,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_from_results() {
        let summary = BatchOperationSummary::from_results(vec![
            BatchOperationResult::succeeded("1"),
            BatchOperationResult::failed("2", SearchIndexError::index("bad")),
            BatchOperationResult::succeeded("3"),
        ]);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[1].document_id, "2");
    }

    #[test]
    fn test_fetch_request_builder() {
        let request = FetchRequest::new(vec!["products".to_string()], 50).after(Some(9));
        assert_eq!(request.after_sequence, Some(9));
        assert_eq!(request.limit, 50);
    }
}
