//! Index writer: applies upserts and deletes to the search index.
//!
//! Requests are grouped per collection and operation, sent in bulk and
//! retried with exponential backoff while the index reports a transient
//! failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::dedup::EffectiveAction;
use crate::errors::{PipelineError, RecordError};
use crate::loader::FailedRecord;
use search_sync_repository::{BatchOperationSummary, SearchIndexError, SearchIndexProvider};
use search_sync_shared::IndexDocument;

/// Retry settings for index calls.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum number of retry attempts for a failed call.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 5000,
        }
    }
}

/// One write against a collection.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub action: EffectiveAction,
    pub collection: String,
    /// Document to upsert; `None` deletes `action.record_id`.
    pub document: Option<IndexDocument>,
}

impl WriteRequest {
    pub fn upsert(action: EffectiveAction, collection: impl Into<String>, document: IndexDocument) -> Self {
        Self {
            action,
            collection: collection.into(),
            document: Some(document),
        }
    }

    pub fn delete(action: EffectiveAction, collection: impl Into<String>) -> Self {
        Self {
            action,
            collection: collection.into(),
            document: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.document.is_none()
    }
}

/// Per-record outcome of [`IndexWriter::write`].
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub upserted: Vec<EffectiveAction>,
    pub deleted: Vec<EffectiveAction>,
    pub failed: Vec<FailedRecord>,
}

impl WriteOutcome {
    /// Actions the index accepted, whichever the operation.
    pub fn succeeded(&self) -> impl Iterator<Item = &EffectiveAction> {
        self.upserted.iter().chain(self.deleted.iter())
    }
}

#[derive(Clone, Copy)]
enum IndexCall<'a> {
    Upsert(&'a [IndexDocument]),
    Delete(&'a [String]),
}

/// Writes index documents on behalf of the batch coordinator.
pub struct IndexWriter {
    index: Arc<dyn SearchIndexProvider>,
    config: WriterConfig,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn SearchIndexProvider>) -> Self {
        Self::with_config(index, WriterConfig::default())
    }

    pub fn with_config(index: Arc<dyn SearchIndexProvider>, config: WriterConfig) -> Self {
        Self { index, config }
    }

    /// Apply `requests` and report each record's outcome.
    ///
    /// Documents the index rejects are reported as failed. An index that stays
    /// unreachable after the retries is a batch-wide error.
    #[instrument(skip(self, requests), fields(requests = requests.len()))]
    pub async fn write(&self, requests: Vec<WriteRequest>) -> Result<WriteOutcome, PipelineError> {
        let mut outcome = WriteOutcome::default();
        let mut groups: BTreeMap<(String, bool), Vec<WriteRequest>> = BTreeMap::new();

        for request in requests {
            groups
                .entry((request.collection.clone(), request.is_delete()))
                .or_default()
                .push(request);
        }

        for ((collection, is_delete), group) in groups {
            let response = if is_delete {
                let ids: Vec<String> = group.iter().map(|r| r.action.record_id.clone()).collect();
                self.send_with_retry(&collection, IndexCall::Delete(&ids)).await
            } else {
                let documents: Vec<IndexDocument> =
                    group.iter().filter_map(|r| r.document.clone()).collect();
                self.send_with_retry(&collection, IndexCall::Upsert(&documents)).await
            };

            let summary = match response {
                Ok(summary) => summary,
                Err(e) if e.is_connectivity() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        collection = %collection,
                        count = group.len(),
                        error = %e,
                        "Index rejected the request"
                    );
                    for request in group {
                        outcome.failed.push(FailedRecord {
                            action: request.action,
                            error: RecordError::Write(e.to_string()),
                        });
                    }
                    continue;
                }
            };

            debug!(
                collection = %collection,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Index call completed"
            );

            for (position, request) in group.into_iter().enumerate() {
                match summary.results.get(position) {
                    Some(result) if result.success => {
                        if is_delete {
                            outcome.deleted.push(request.action);
                        } else {
                            outcome.upserted.push(request.action);
                        }
                    }
                    Some(result) => {
                        let reason = result
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "rejected by the index".to_string());
                        outcome.failed.push(FailedRecord {
                            action: request.action,
                            error: RecordError::Write(reason),
                        });
                    }
                    None => outcome.failed.push(FailedRecord {
                        action: request.action,
                        error: RecordError::Write("no result returned by the index".to_string()),
                    }),
                }
            }
        }

        Ok(outcome)
    }

    async fn send_with_retry(
        &self,
        collection: &str,
        call: IndexCall<'_>,
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        let mut delay_ms = self.config.initial_retry_delay_ms;
        let mut last_error = SearchIndexError::unknown("Index call was never attempted");

        for attempt in 0..=self.config.max_retries {
            let result = match call {
                IndexCall::Upsert(documents) => self.index.upsert_documents(collection, documents).await,
                IndexCall::Delete(ids) => self.index.delete_documents(collection, ids).await,
            };

            match result {
                Ok(summary) => {
                    if attempt > 0 {
                        info!(
                            attempt = attempt,
                            collection = %collection,
                            "Index call succeeded after retry"
                        );
                    }
                    return Ok(summary);
                }
                Err(e) => {
                    if !e.is_retryable() {
                        debug!(error = %e, "Non-retryable error encountered");
                        return Err(e);
                    }

                    // Don't wait after the last attempt
                    if attempt < self.config.max_retries {
                        warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.max_retries,
                            delay_ms = delay_ms,
                            collection = %collection,
                            error = %e,
                            "Index call failed, retrying"
                        );

                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = std::cmp::min(delay_ms * 2, self.config.max_retry_delay_ms);
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
