//! Batch fetcher: claims a bounded, ordered slice of pending queue entries.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::errors::PipelineError;
use search_sync_repository::{ClaimedBatch, FetchRequest, QueueStore};

/// Reads pending entries for the configured sources.
pub struct BatchFetcher {
    queue: Arc<dyn QueueStore>,
    source_names: Vec<String>,
    batch_size: usize,
}

impl BatchFetcher {
    /// Create a fetcher for `source_names` returning at most `batch_size`
    /// entries per claim.
    pub fn new(queue: Arc<dyn QueueStore>, source_names: Vec<String>, batch_size: usize) -> Self {
        Self {
            queue,
            source_names,
            batch_size: batch_size.max(1),
        }
    }

    /// Claim the next entries with a sequence greater than `after`.
    ///
    /// An empty queue yields an empty batch. The claim is released when the
    /// returned batch is committed, rolled back or dropped.
    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn fetch(&self, after: Option<i64>) -> Result<Box<dyn ClaimedBatch>, PipelineError> {
        let request =
            FetchRequest::new(self.source_names.clone(), self.batch_size).after(after);
        let batch = self.queue.claim_batch(&request).await?;

        debug!(entries = batch.entries().len(), "Fetched queue entries");
        Ok(batch)
    }
}
