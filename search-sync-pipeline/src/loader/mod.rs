//! Record loader: re-reads the current row for every non-delete action.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::dedup::EffectiveAction;
use crate::errors::{PipelineError, RecordError};
use search_sync_repository::SourceStore;
use search_sync_shared::{SourceRow, TableConfig};

/// An action ready for processing.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    pub action: EffectiveAction,
    /// Current source row. `None` for deletes, including actions downgraded
    /// because the row no longer exists.
    pub row: Option<SourceRow>,
}

/// An action that cannot be applied in this batch.
#[derive(Debug, Clone)]
pub struct FailedRecord {
    pub action: EffectiveAction,
    pub error: RecordError,
}

/// Outcome of loading a batch of actions.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Loaded records, by ascending winning sequence.
    pub records: Vec<LoadedRecord>,
    pub failed: Vec<FailedRecord>,
}

/// Reads source rows for effective actions.
///
/// Rows are read from the action's `source_name`, which for view-backed
/// sources is the view and not the table the change was captured on.
pub struct RecordLoader {
    source: Arc<dyn SourceStore>,
    primary_keys: HashMap<String, String>,
}

impl RecordLoader {
    pub fn new(source: Arc<dyn SourceStore>, tables: &[TableConfig]) -> Self {
        let primary_keys = tables
            .iter()
            .map(|t| (t.source_name.clone(), t.primary_key.clone()))
            .collect();

        Self {
            source,
            primary_keys,
        }
    }

    /// Load the current state of every non-delete action.
    ///
    /// Records whose row is gone are downgraded to deletes. A failed read of
    /// one source fails only that source's records, unless the store is
    /// unreachable, which fails the whole batch.
    #[instrument(skip(self, actions), fields(actions = actions.len()))]
    pub async fn load(&self, actions: Vec<EffectiveAction>) -> Result<LoadResult, PipelineError> {
        let mut result = LoadResult::default();
        let mut by_source: BTreeMap<String, Vec<EffectiveAction>> = BTreeMap::new();

        for action in actions {
            if action.operation.is_delete() {
                result.records.push(LoadedRecord { action, row: None });
            } else {
                by_source
                    .entry(action.source_name.clone())
                    .or_default()
                    .push(action);
            }
        }

        for (source_name, group) in by_source {
            let Some(primary_key) = self.primary_keys.get(&source_name) else {
                for action in group {
                    result.failed.push(FailedRecord {
                        error: RecordError::SchemaValidation(format!(
                            "no table configuration for source '{}'",
                            source_name
                        )),
                        action,
                    });
                }
                continue;
            };

            let record_ids: Vec<String> = group.iter().map(|a| a.record_id.clone()).collect();
            let mut rows = match self
                .source
                .fetch_rows(&source_name, primary_key, &record_ids)
                .await
            {
                Ok(rows) => rows,
                Err(e) if e.is_connectivity() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        source_name = %source_name,
                        records = group.len(),
                        error = %e,
                        "Failed to read source rows, skipping records"
                    );
                    for action in group {
                        result.failed.push(FailedRecord {
                            action,
                            error: RecordError::Load(e.to_string()),
                        });
                    }
                    continue;
                }
            };

            for action in group {
                match rows.remove(&action.record_id) {
                    Some(row) => result.records.push(LoadedRecord {
                        action,
                        row: Some(row),
                    }),
                    None => {
                        debug!(
                            record_id = %action.record_id,
                            source_name = %source_name,
                            "Row no longer exists, deleting from index"
                        );
                        result.records.push(LoadedRecord {
                            action: action.as_delete(),
                            row: None,
                        });
                    }
                }
            }
        }

        result.records.sort_by_key(|r| r.action.winning_sequence);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Deduplicator;
    use crate::test_support::MockSourceStore;
    use search_sync_shared::{Operation, QueueEntry, SourceValue};

    fn row(id: &str) -> SourceRow {
        let mut row = SourceRow::new();
        row.insert("id".to_string(), SourceValue::from(id));
        row
    }

    fn tables() -> Vec<TableConfig> {
        vec![
            TableConfig::new("products", "products", Vec::new()),
            TableConfig::new("product_search_view", "product_search", Vec::new())
                .with_reference_table("products"),
        ]
    }

    #[tokio::test]
    async fn test_missing_row_downgrades_to_delete() {
        let source = Arc::new(MockSourceStore::new());
        source.insert("products", "1", row("1")).await;
        let loader = RecordLoader::new(source, &tables());

        let actions = Deduplicator::reduce(&[
            QueueEntry::new(1, "1", "products", Operation::Insert),
            QueueEntry::new(2, "2", "products", Operation::Update),
        ]);
        let result = loader.load(actions).await.unwrap();

        assert!(result.failed.is_empty());
        assert_eq!(result.records.len(), 2);
        assert!(result.records[0].row.is_some());
        assert_eq!(result.records[1].action.operation, Operation::Delete);
        assert!(result.records[1].row.is_none());
    }

    #[tokio::test]
    async fn test_deletes_are_not_loaded() {
        let source = Arc::new(MockSourceStore::new());
        let loader = RecordLoader::new(source.clone(), &tables());

        let actions = Deduplicator::reduce(&[QueueEntry::new(1, "1", "products", Operation::Delete)]);
        let result = loader.load(actions).await.unwrap();

        assert_eq!(result.records.len(), 1);
        assert!(source.queried.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_view_sources_read_the_view() {
        let source = Arc::new(MockSourceStore::new());
        source.insert("product_search_view", "5", row("5")).await;
        let loader = RecordLoader::new(source.clone(), &tables());

        let actions = Deduplicator::reduce(&[QueueEntry::new(
            1,
            "5",
            "product_search_view",
            Operation::Update,
        )]);
        let result = loader.load(actions).await.unwrap();

        assert_eq!(*source.queried.lock().await, vec!["product_search_view".to_string()]);
        assert!(result.records[0].row.is_some());
    }

    #[tokio::test]
    async fn test_broken_source_fails_only_its_records() {
        let source = Arc::new(MockSourceStore::new());
        source.insert("products", "1", row("1")).await;
        source.break_source("product_search_view").await;
        let loader = RecordLoader::new(source, &tables());

        let actions = Deduplicator::reduce(&[
            QueueEntry::new(1, "1", "products", Operation::Insert),
            QueueEntry::new(2, "9", "product_search_view", Operation::Insert),
        ]);
        let result = loader.load(actions).await.unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert!(matches!(result.failed[0].error, RecordError::Load(_)));
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_the_batch() {
        let source = Arc::new(MockSourceStore::new());
        source.set_unreachable(true);
        let loader = RecordLoader::new(source, &tables());

        let actions = Deduplicator::reduce(&[QueueEntry::new(1, "1", "products", Operation::Insert)]);
        let err = loader.load(actions).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_unconfigured_source_is_record_local() {
        let loader = RecordLoader::new(Arc::new(MockSourceStore::new()), &tables());

        let actions = Deduplicator::reduce(&[QueueEntry::new(1, "1", "orders", Operation::Insert)]);
        let result = loader.load(actions).await.unwrap();

        assert!(matches!(
            result.failed[0].error,
            RecordError::SchemaValidation(_)
        ));
    }
}
