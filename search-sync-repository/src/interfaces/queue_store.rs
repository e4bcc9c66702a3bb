//! Queue store trait definition.
//!
//! The queue store is the durable list of pending changes. Consumers use a
//! claim-then-commit protocol: a fetch claims entries for the lifetime of a
//! [`ClaimedBatch`], and only committing that batch removes entries.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::types::{FetchRequest, QueueStats};
use search_sync_shared::QueueEntry;

/// Abstract interface for the queue of pending changes.
///
/// # Concurrency
///
/// Two concurrent claims must never hand the same entry to different
/// consumers. Implementations that cannot lock rows must at least make
/// [`ClaimedBatch::commit`] conditional on the entries still existing.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Claim up to `request.limit` pending entries ordered by ascending sequence.
    ///
    /// Entries locked by another consumer are skipped. An empty queue yields an
    /// empty batch, not an error. Claiming does not change any entry.
    ///
    /// # Arguments
    ///
    /// * `request` - Source filter, sequence cursor and size bound
    ///
    /// # Returns
    ///
    /// * `Ok(Box<dyn ClaimedBatch>)` - The claimed entries
    /// * `Err(StoreError)` - If the store could not be read
    async fn claim_batch(&self, request: &FetchRequest)
        -> Result<Box<dyn ClaimedBatch>, StoreError>;

    /// Check whether the queue storage has been created.
    async fn queue_exists(&self) -> Result<bool, StoreError>;

    /// Aggregate statistics for the given sources.
    async fn stats(&self, source_names: &[String]) -> Result<QueueStats, StoreError>;
}

/// A set of queue entries held by one consumer until commit or rollback.
///
/// Dropping a batch without committing releases the claim and leaves every
/// entry queued.
#[async_trait]
pub trait ClaimedBatch: Send {
    /// The claimed entries, ordered by ascending sequence.
    fn entries(&self) -> &[QueueEntry];

    /// Remove the entries with the given sequences and release the claim,
    /// as one atomic unit.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of entries removed
    /// * `Err(StoreError)` - If the removal failed; no entry was removed
    async fn commit(self: Box<Self>, sequences: &[i64]) -> Result<u64, StoreError>;

    /// Release the claim without removing anything.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
