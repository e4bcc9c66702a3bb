//! Collapses the queue entries of a batch into one action per record.

use std::collections::HashMap;

use search_sync_shared::{Operation, QueueEntry};

/// The net change for one `(record_id, source_name)` within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAction {
    pub record_id: String,
    pub source_name: String,
    /// Operation to apply to the index.
    pub operation: Operation,
    /// Sequence of the entry whose operation won.
    pub winning_sequence: i64,
    /// Every entry of the group, ascending. All of them are removed together
    /// once the action has been applied.
    pub covered: Vec<i64>,
}

impl EffectiveAction {
    fn from_entry(entry: &QueueEntry) -> Self {
        Self {
            record_id: entry.record_id.clone(),
            source_name: entry.source_name.clone(),
            operation: entry.operation,
            winning_sequence: entry.sequence,
            covered: vec![entry.sequence],
        }
    }

    /// Add `entry` to the group. It takes over when it beats the current
    /// winner on priority, then on sequence.
    fn absorb(&mut self, entry: &QueueEntry) {
        self.covered.push(entry.sequence);

        let current = (self.operation.priority(), self.winning_sequence);
        let candidate = (entry.operation.priority(), entry.sequence);
        if candidate > current {
            self.operation = entry.operation;
            self.winning_sequence = entry.sequence;
        }
    }

    /// The same action redirected to a delete, used when the source row is gone.
    pub fn as_delete(&self) -> Self {
        Self {
            operation: Operation::Delete,
            ..self.clone()
        }
    }
}

/// Groups entries by record and picks one effective action per group.
pub struct Deduplicator;

impl Deduplicator {
    /// Reduce `entries` to effective actions.
    ///
    /// Within a group `DELETE > UPDATE > INSERT`, and among entries with the
    /// winning operation the greatest sequence wins. The result does not
    /// depend on the order of `entries`; actions are returned by ascending
    /// winning sequence.
    pub fn reduce(entries: &[QueueEntry]) -> Vec<EffectiveAction> {
        let mut groups: HashMap<(&str, &str), EffectiveAction> = HashMap::new();

        for entry in entries {
            groups
                .entry(entry.record_key())
                .and_modify(|action| action.absorb(entry))
                .or_insert_with(|| EffectiveAction::from_entry(entry));
        }

        let mut actions: Vec<EffectiveAction> = groups
            .into_values()
            .map(|mut action| {
                action.covered.sort_unstable();
                action
            })
            .collect();
        actions.sort_by_key(|action| action.winning_sequence);
        actions
    }
}
