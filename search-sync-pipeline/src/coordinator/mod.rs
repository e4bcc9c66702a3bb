//! Batch coordinator.
//!
//! Drives one batch through fetch, dedup, load, process and write, then
//! either commits the queue entries of the records that made it into the
//! index or rolls the whole claim back.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::dedup::Deduplicator;
use crate::errors::{PipelineError, RecordError};
use crate::fetcher::BatchFetcher;
use crate::loader::{FailedRecord, RecordLoader};
use crate::processor::{DocumentProcessor, TransformRegistry};
use crate::writer::{IndexWriter, WriteRequest, WriterConfig};
use search_sync_repository::{ClaimedBatch, QueueStore, SearchIndexProvider, SourceStore};
use search_sync_shared::{QueueEntry, TableConfig};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum queue entries claimed per batch.
    pub batch_size: usize,
    pub writer: WriterConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            writer: WriterConfig::default(),
        }
    }
}

/// Where the coordinator is within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Fetching,
    Deduplicating,
    Loading,
    Transforming,
    Writing,
    Committing,
    RollingBack,
}

/// Counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Queue entries claimed.
    pub fetched: usize,
    /// Effective actions after deduplication.
    pub actions: usize,
    pub upserted: usize,
    pub deleted: usize,
    /// Records left queued for a later run.
    pub skipped: usize,
    /// Queue entries removed.
    pub committed: u64,
    /// Highest sequence claimed.
    pub last_sequence: Option<i64>,
}

/// Totals over every batch of a [`BatchCoordinator::drain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: usize,
    pub fetched: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub committed: u64,
}

impl SyncReport {
    /// Fold one committed batch into the totals.
    pub fn record(&mut self, cycle: &CycleReport) {
        self.batches += 1;
        self.fetched += cycle.fetched;
        self.upserted += cycle.upserted;
        self.deleted += cycle.deleted;
        self.skipped += cycle.skipped;
        self.committed += cycle.committed;
    }
}

/// Owns one pipeline and the cursor into the queue.
///
/// The cursor only moves forward after a batch commits, so records skipped
/// in a batch are not refetched by the same coordinator and a failed batch
/// is fetched again.
pub struct BatchCoordinator {
    fetcher: BatchFetcher,
    loader: RecordLoader,
    processor: DocumentProcessor,
    writer: IndexWriter,
    state: BatchState,
    cursor: Option<i64>,
}

impl BatchCoordinator {
    /// Assemble the pipeline for `tables`.
    ///
    /// Fails when no table is configured or a named transformer is not in
    /// `registry`.
    pub fn new(
        queue: Arc<dyn QueueStore>,
        source: Arc<dyn SourceStore>,
        index: Arc<dyn SearchIndexProvider>,
        tables: &[TableConfig],
        registry: &TransformRegistry,
        config: CoordinatorConfig,
    ) -> Result<Self, PipelineError> {
        if tables.is_empty() {
            return Err(PipelineError::config("No tables to synchronize"));
        }

        let source_names = tables.iter().map(|t| t.source_name.clone()).collect();

        Ok(Self {
            fetcher: BatchFetcher::new(queue, source_names, config.batch_size),
            loader: RecordLoader::new(source, tables),
            processor: DocumentProcessor::new(tables, registry)?,
            writer: IndexWriter::with_config(index, config.writer),
            state: BatchState::Idle,
            cursor: None,
        })
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Highest sequence of the last committed batch.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Process one batch past the cursor.
    ///
    /// An empty queue returns an empty report without touching the index.
    /// Batch-wide failures roll the claim back and leave the cursor where it was.
    #[instrument(skip(self), fields(cursor = ?self.cursor))]
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PipelineError> {
        self.state = BatchState::Fetching;
        let batch = match self.fetcher.fetch(self.cursor).await {
            Ok(batch) => batch,
            Err(e) => {
                self.state = BatchState::Idle;
                error!(error = %e, "Failed to fetch queue entries");
                return Err(e);
            }
        };

        let entries: Vec<QueueEntry> = batch.entries().to_vec();
        if entries.is_empty() {
            self.release(batch).await;
            self.state = BatchState::Idle;
            return Ok(CycleReport::default());
        }

        match self.apply(&entries).await {
            Ok((mut report, sequences)) => {
                self.state = BatchState::Committing;
                let committed = batch.commit(&sequences).await;
                self.state = BatchState::Idle;

                report.committed = committed.map_err(|e| {
                    error!(error = %e, "Failed to commit batch");
                    PipelineError::from(e)
                })?;
                self.cursor = report.last_sequence;

                info!(
                    fetched = report.fetched,
                    actions = report.actions,
                    upserted = report.upserted,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    committed = report.committed,
                    "Batch committed"
                );
                Ok(report)
            }
            Err(e) => {
                self.state = BatchState::RollingBack;
                error!(error = %e, entries = entries.len(), "Batch failed, rolling back");
                self.release(batch).await;
                self.state = BatchState::Idle;
                Err(e)
            }
        }
    }

    /// Run batches until a fetch past the cursor comes back empty.
    pub async fn drain(&mut self) -> Result<SyncReport, PipelineError> {
        let mut report = SyncReport::default();

        loop {
            let cycle = self.run_cycle().await?;
            if cycle.fetched == 0 {
                return Ok(report);
            }
            report.record(&cycle);
        }
    }

    /// Runs everything between fetch and commit. Returns the report and the
    /// queue sequences to delete.
    async fn apply(&mut self, entries: &[QueueEntry]) -> Result<(CycleReport, Vec<i64>), PipelineError> {
        let mut report = CycleReport {
            fetched: entries.len(),
            last_sequence: entries.iter().map(|e| e.sequence).max(),
            ..CycleReport::default()
        };

        self.state = BatchState::Deduplicating;
        let actions = Deduplicator::reduce(entries);
        report.actions = actions.len();

        self.state = BatchState::Loading;
        let loaded = self.loader.load(actions).await?;
        let mut skipped = loaded.failed;

        self.state = BatchState::Transforming;
        let mut requests = Vec::with_capacity(loaded.records.len());
        for record in loaded.records {
            let action = record.action;
            let Some(table) = self.processor.table(&action.source_name) else {
                skipped.push(FailedRecord {
                    error: RecordError::SchemaValidation(format!(
                        "no table configuration for source '{}'",
                        action.source_name
                    )),
                    action,
                });
                continue;
            };
            let collection = table.collection_name.clone();

            match record.row {
                None => requests.push(WriteRequest::delete(action, collection)),
                Some(row) => match self.processor.process(&action.record_id, &action.source_name, &row) {
                    Ok(document) => requests.push(WriteRequest::upsert(action, collection, document)),
                    Err(error) => skipped.push(FailedRecord { action, error }),
                },
            }
        }

        self.state = BatchState::Writing;
        let outcome = self.writer.write(requests).await?;
        skipped.extend(outcome.failed.iter().cloned());

        for failure in &skipped {
            warn!(
                record_id = %failure.action.record_id,
                source_name = %failure.action.source_name,
                error_kind = failure.error.kind(),
                error = %failure.error,
                "Skipping record, its queue entries stay for retry"
            );
        }

        let mut sequences: Vec<i64> = outcome
            .succeeded()
            .flat_map(|action| action.covered.iter().copied())
            .collect();
        sequences.sort_unstable();

        report.upserted = outcome.upserted.len();
        report.deleted = outcome.deleted.len();
        report.skipped = skipped.len();
        Ok((report, sequences))
    }

    async fn release(&self, batch: Box<dyn ClaimedBatch>) {
        if let Err(e) = batch.rollback().await {
            warn!(error = %e, "Failed to release claimed queue entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockIndex, MockQueueStore, MockSourceStore};
    use search_sync_shared::{FieldSpec, FieldType, Operation, SourceRow, SourceValue};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn products() -> TableConfig {
        TableConfig::new(
            "products",
            "products",
            vec![
                FieldSpec::new("id", FieldType::String),
                FieldSpec::new("name", FieldType::String),
                FieldSpec::new("price", FieldType::Float),
            ],
        )
    }

    fn product_search() -> TableConfig {
        TableConfig::new(
            "product_search_view",
            "product_search",
            vec![
                FieldSpec::new("id", FieldType::String),
                FieldSpec::new("title", FieldType::String).with_source_column("name"),
            ],
        )
        .with_reference_table("products")
    }

    fn embeddings() -> TableConfig {
        TableConfig::new(
            "embeddings",
            "embeddings",
            vec![
                FieldSpec::new("id", FieldType::String),
                FieldSpec::new("embedding", FieldType::FloatArray).with_num_dim(3),
            ],
        )
    }

    fn row(pairs: &[(&str, SourceValue)]) -> SourceRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn product_row(id: &str, name: &str) -> SourceRow {
        row(&[("id", SourceValue::from(id)), ("name", SourceValue::from(name)), ("price", SourceValue::Float(12.0))])
    }

    fn config(batch_size: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            batch_size,
            writer: WriterConfig {
                max_retries: 2,
                initial_retry_delay_ms: 1,
                max_retry_delay_ms: 2,
            },
        }
    }

    struct Harness {
        queue: Arc<MockQueueStore>,
        source: Arc<MockSourceStore>,
        index: Arc<MockIndex>,
    }

    impl Harness {
        fn new(entries: Vec<QueueEntry>) -> Self {
            Self {
                queue: Arc::new(MockQueueStore::with_entries(entries)),
                source: Arc::new(MockSourceStore::new()),
                index: Arc::new(MockIndex::new()),
            }
        }

        fn coordinator(&self, batch_size: usize) -> BatchCoordinator {
            BatchCoordinator::new(
                self.queue.clone(),
                self.source.clone(),
                self.index.clone(),
                &[products(), product_search(), embeddings()],
                &TransformRegistry::new(),
                config(batch_size),
            )
            .unwrap()
        }
    }

    #[tokio::test]
    async fn test_commit_covers_only_written_records() {
        let harness = Harness::new(vec![
            QueueEntry::new(1, "1", "products", Operation::Insert),
            QueueEntry::new(2, "1", "products", Operation::Update),
            QueueEntry::new(3, "2", "products", Operation::Insert),
        ]);
        harness.source.insert("products", "1", product_row("1", "Lamp")).await;
        harness.source.insert("products", "2", product_row("2", "Desk")).await;
        harness.index.reject("2").await;
        let mut coordinator = harness.coordinator(10);

        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.actions, 2);
        assert_eq!(report.upserted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.committed, 2);
        assert_eq!(harness.queue.pending().await, vec![3]);
        assert_eq!(coordinator.cursor(), Some(3));
        assert_eq!(coordinator.state(), BatchState::Idle);

        let stored = harness.index.document("products", "1").await.unwrap();
        assert_eq!(serde_json::Value::Object(stored), json!({"id": "1", "name": "Lamp", "price": 12.0}));
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_no_op() {
        let harness = Harness::new(Vec::new());
        let mut coordinator = harness.coordinator(10);

        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert_eq!(harness.index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.state(), BatchState::Idle);
        assert_eq!(coordinator.cursor(), None);
    }

    #[tokio::test]
    async fn test_delete_wins_within_batch() {
        let harness = Harness::new(vec![
            QueueEntry::new(1, "1", "products", Operation::Delete),
            QueueEntry::new(2, "1", "products", Operation::Insert),
        ]);
        harness.source.insert("products", "1", product_row("1", "Lamp")).await;
        harness
            .index
            .documents
            .lock()
            .await
            .insert(("products".to_string(), "1".to_string()), serde_json::Map::new());
        let mut coordinator = harness.coordinator(10);

        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.upserted, 0);
        assert!(harness.index.document("products", "1").await.is_none());
        assert!(harness.queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_row_is_deleted() {
        let harness = Harness::new(vec![QueueEntry::new(1, "9", "products", Operation::Update)]);
        let mut coordinator = harness.coordinator(10);

        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.committed, 1);
    }

    #[tokio::test]
    async fn test_view_backed_source_writes_its_collection() {
        let harness = Harness::new(vec![QueueEntry::new(1, "5", "product_search_view", Operation::Update)]);
        harness
            .source
            .insert("product_search_view", "5", row(&[("id", SourceValue::Int(5)), ("name", SourceValue::from("Chair"))]))
            .await;
        let mut coordinator = harness.coordinator(10);

        coordinator.run_cycle().await.unwrap();

        assert_eq!(*harness.source.queried.lock().await, vec!["product_search_view".to_string()]);
        let stored = harness.index.document("product_search", "5").await.unwrap();
        assert_eq!(serde_json::Value::Object(stored), json!({"id": "5", "title": "Chair"}));
    }

    #[tokio::test]
    async fn test_conversion_failure_skips_only_that_record() {
        let harness = Harness::new(vec![
            QueueEntry::new(1, "a", "embeddings", Operation::Insert),
            QueueEntry::new(2, "b", "embeddings", Operation::Insert),
        ]);
        harness
            .source
            .insert("embeddings", "a", row(&[("id", SourceValue::from("a")), ("embedding", SourceValue::from("[1.0,2.0]"))]))
            .await;
        harness
            .source
            .insert("embeddings", "b", row(&[("id", SourceValue::from("b")), ("embedding", SourceValue::from("[1.0,2.0,3.0]"))]))
            .await;
        let mut coordinator = harness.coordinator(10);

        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.upserted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(harness.queue.pending().await, vec![1]);
        assert!(harness.index.document("embeddings", "a").await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_index_rolls_back() {
        let harness = Harness::new(vec![QueueEntry::new(1, "1", "products", Operation::Insert)]);
        harness.source.insert("products", "1", product_row("1", "Lamp")).await;
        harness.index.set_down(true);
        let mut coordinator = harness.coordinator(10);

        let err = coordinator.run_cycle().await.unwrap_err();

        assert!(err.is_connectivity());
        assert_eq!(harness.queue.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(harness.queue.pending().await, vec![1]);
        assert_eq!(coordinator.cursor(), None);
        assert_eq!(coordinator.state(), BatchState::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_source_rolls_back() {
        let harness = Harness::new(vec![QueueEntry::new(1, "1", "products", Operation::Insert)]);
        harness.source.set_unreachable(true);
        let mut coordinator = harness.coordinator(10);

        assert!(coordinator.run_cycle().await.unwrap_err().is_connectivity());
        assert_eq!(harness.index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.queue.pending().await, vec![1]);
    }

    #[tokio::test]
    async fn test_unreachable_queue_fails_without_claiming() {
        let harness = Harness::new(vec![QueueEntry::new(1, "1", "products", Operation::Insert)]);
        harness.source.insert("products", "1", product_row("1", "Lamp")).await;
        harness.queue.set_claim_unreachable(true);
        let mut coordinator = harness.coordinator(10);

        assert!(coordinator.run_cycle().await.unwrap_err().is_connectivity());
        assert_eq!(coordinator.state(), BatchState::Idle);
        assert_eq!(coordinator.cursor(), None);
        assert_eq!(harness.index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.queue.rollbacks.load(Ordering::SeqCst), 0);

        harness.queue.set_claim_unreachable(false);
        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.upserted, 1);
        assert!(harness.queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_index_failure_recovers() {
        let harness = Harness::new(vec![QueueEntry::new(1, "1", "products", Operation::Insert)]);
        harness.source.insert("products", "1", product_row("1", "Lamp")).await;
        harness.index.fail_next(1);
        let mut coordinator = harness.coordinator(10);

        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.upserted, 1);
        assert!(harness.queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_is_replayed_idempotently() {
        let harness = Harness::new(vec![QueueEntry::new(1, "1", "products", Operation::Insert)]);
        harness.source.insert("products", "1", product_row("1", "Lamp")).await;
        harness.queue.set_commit_fails(true);
        let mut coordinator = harness.coordinator(10);

        assert!(coordinator.run_cycle().await.is_err());
        let first = harness.index.document("products", "1").await.unwrap();
        assert_eq!(coordinator.cursor(), None);

        harness.queue.set_commit_fails(false);
        let report = coordinator.run_cycle().await.unwrap();

        assert_eq!(report.committed, 1);
        assert_eq!(harness.index.document("products", "1").await.unwrap(), first);
        assert!(harness.queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_walks_past_skipped_records() {
        let harness = Harness::new(vec![
            QueueEntry::new(1, "1", "products", Operation::Insert),
            QueueEntry::new(2, "2", "products", Operation::Insert),
            QueueEntry::new(3, "3", "products", Operation::Insert),
        ]);
        for id in ["1", "2", "3"] {
            harness.source.insert("products", id, product_row(id, "Lamp")).await;
        }
        harness.index.reject("1").await;
        let mut coordinator = harness.coordinator(1);

        let report = coordinator.drain().await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.upserted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(harness.queue.pending().await, vec![1]);
        assert_eq!(harness.queue.claims.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_requires_tables() {
        let harness = Harness::new(Vec::new());
        let err = BatchCoordinator::new(
            harness.queue.clone(),
            harness.source.clone(),
            harness.index.clone(),
            &[],
            &TransformRegistry::new(),
            CoordinatorConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }
}
