//! In-memory stores for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use search_sync_repository::{
    BatchOperationResult, BatchOperationSummary, ClaimedBatch, FetchRequest, QueueStats,
    QueueStore, SearchIndexError, SearchIndexProvider, SourceStore, StoreError,
};
use search_sync_shared::{IndexDocument, QueueEntry, SourceRow};

/// Queue store over a shared vector of entries.
pub struct MockQueueStore {
    entries: Arc<Mutex<Vec<QueueEntry>>>,
    claim_unreachable: AtomicBool,
    commit_fails: AtomicBool,
    pub claims: AtomicUsize,
    pub rollbacks: Arc<AtomicUsize>,
}

impl MockQueueStore {
    pub fn with_entries(entries: Vec<QueueEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            claim_unreachable: AtomicBool::new(false),
            commit_fails: AtomicBool::new(false),
            claims: AtomicUsize::new(0),
            rollbacks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_claim_unreachable(&self, value: bool) {
        self.claim_unreachable.store(value, Ordering::SeqCst);
    }

    pub fn set_commit_fails(&self, value: bool) {
        self.commit_fails.store(value, Ordering::SeqCst);
    }

    /// Sequences still queued, ascending.
    pub async fn pending(&self) -> Vec<i64> {
        let mut sequences: Vec<i64> = self.entries.lock().await.iter().map(|e| e.sequence).collect();
        sequences.sort_unstable();
        sequences
    }
}

#[async_trait]
impl QueueStore for MockQueueStore {
    async fn claim_batch(
        &self,
        request: &FetchRequest,
    ) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        if self.claim_unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::connection("Mock queue unreachable"));
        }

        let mut claimed: Vec<QueueEntry> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| request.source_names.contains(&e.source_name))
            .filter(|e| request.after_sequence.map_or(true, |after| e.sequence > after))
            .cloned()
            .collect();
        claimed.sort_by_key(|e| e.sequence);
        claimed.truncate(request.limit);

        Ok(Box::new(MockClaimedBatch {
            entries: claimed,
            store: Arc::clone(&self.entries),
            commit_fails: self.commit_fails.load(Ordering::SeqCst),
            rollbacks: Arc::clone(&self.rollbacks),
        }))
    }

    async fn queue_exists(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn stats(&self, source_names: &[String]) -> Result<QueueStats, StoreError> {
        let entries = self.entries.lock().await;
        let total = entries
            .iter()
            .filter(|e| source_names.contains(&e.source_name))
            .count();
        Ok(QueueStats {
            total: total as i64,
            ..QueueStats::default()
        })
    }
}

struct MockClaimedBatch {
    entries: Vec<QueueEntry>,
    store: Arc<Mutex<Vec<QueueEntry>>>,
    commit_fails: bool,
    rollbacks: Arc<AtomicUsize>,
}

#[async_trait]
impl ClaimedBatch for MockClaimedBatch {
    fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    async fn commit(self: Box<Self>, sequences: &[i64]) -> Result<u64, StoreError> {
        if self.commit_fails {
            return Err(StoreError::timeout("Mock commit timed out"));
        }

        let claimed: HashSet<i64> = self.entries.iter().map(|e| e.sequence).collect();
        let mut store = self.store.lock().await;
        let before = store.len();
        store.retain(|e| !(sequences.contains(&e.sequence) && claimed.contains(&e.sequence)));
        Ok((before - store.len()) as u64)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Source store over an in-memory row map.
pub struct MockSourceStore {
    rows: Mutex<HashMap<(String, String), SourceRow>>,
    broken_sources: Mutex<HashSet<String>>,
    unreachable: AtomicBool,
    pub queried: Mutex<Vec<String>>,
}

impl MockSourceStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            broken_sources: Mutex::new(HashSet::new()),
            unreachable: AtomicBool::new(false),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub async fn insert(&self, source_name: &str, record_id: &str, row: SourceRow) {
        self.rows
            .lock()
            .await
            .insert((source_name.to_string(), record_id.to_string()), row);
    }

    pub async fn break_source(&self, source_name: &str) {
        self.broken_sources.lock().await.insert(source_name.to_string());
    }

    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceStore for MockSourceStore {
    async fn fetch_rows(
        &self,
        source_name: &str,
        _primary_key: &str,
        record_ids: &[String],
    ) -> Result<HashMap<String, SourceRow>, StoreError> {
        self.queried.lock().await.push(source_name.to_string());

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::connection("Mock source unreachable"));
        }
        if self.broken_sources.lock().await.contains(source_name) {
            return Err(StoreError::missing_object(format!(
                "relation '{}' does not exist",
                source_name
            )));
        }

        let rows = self.rows.lock().await;
        Ok(record_ids
            .iter()
            .filter_map(|id| {
                rows.get(&(source_name.to_string(), id.clone()))
                    .map(|row| (id.clone(), row.clone()))
            })
            .collect())
    }
}

/// Search index over an in-memory document map.
pub struct MockIndex {
    pub documents: Mutex<HashMap<(String, String), IndexDocument>>,
    rejected_ids: Mutex<HashSet<String>>,
    unavailable_calls: AtomicU32,
    down: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockIndex {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            rejected_ids: Mutex::new(HashSet::new()),
            unavailable_calls: AtomicU32::new(0),
            down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Reject every write of the document with this id.
    pub async fn reject(&self, document_id: &str) {
        self.rejected_ids.lock().await.insert(document_id.to_string());
    }

    /// Answer the next `calls` requests with 503.
    pub fn fail_next(&self, calls: u32) {
        self.unavailable_calls.store(calls, Ordering::SeqCst);
    }

    pub fn set_down(&self, value: bool) {
        self.down.store(value, Ordering::SeqCst);
    }

    pub async fn document(&self, collection: &str, id: &str) -> Option<IndexDocument> {
        self.documents
            .lock()
            .await
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    fn check_available(&self) -> Result<(), SearchIndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(SearchIndexError::connection("Mock index down"));
        }
        let remaining = self.unavailable_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(SearchIndexError::unavailable("Mock index busy"));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndexProvider for MockIndex {
    async fn upsert_documents(
        &self,
        collection: &str,
        documents: &[IndexDocument],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        self.check_available()?;

        let rejected = self.rejected_ids.lock().await;
        let mut stored = self.documents.lock().await;
        let results = documents
            .iter()
            .map(|doc| {
                let id = doc
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if rejected.contains(&id) {
                    BatchOperationResult::failed(id, SearchIndexError::index("Mock rejection"))
                } else {
                    stored.insert((collection.to_string(), id.clone()), doc.clone());
                    BatchOperationResult::succeeded(id)
                }
            })
            .collect();

        Ok(BatchOperationSummary::from_results(results))
    }

    async fn delete_documents(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        self.check_available()?;

        let rejected = self.rejected_ids.lock().await;
        let mut stored = self.documents.lock().await;
        let results = document_ids
            .iter()
            .map(|id| {
                if rejected.contains(id) {
                    BatchOperationResult::failed(id.as_str(), SearchIndexError::delete("Mock rejection"))
                } else {
                    stored.remove(&(collection.to_string(), id.clone()));
                    BatchOperationResult::succeeded(id.as_str())
                }
            })
            .collect();

        Ok(BatchOperationSummary::from_results(results))
    }

    async fn health_check(&self) -> Result<bool, SearchIndexError> {
        Ok(!self.down.load(Ordering::SeqCst))
    }
}
