//! Pending work buffers and the merge/dedup/delete step applied at
//! regeneration time.

use std::collections::HashSet;

use crate::schema::Record;
use crate::store::RecordStore;

/// Records and deletions observed since the last successful regeneration.
///
/// Nothing here is persisted; a crash loses the buffers, and the messages can
/// be fetched again from the platform.
#[derive(Debug, Clone, Default)]
pub struct PendingBuffers {
    additions: Vec<Record>,
    deletions: Vec<String>,
}

/// Lengths of both buffers at the moment a regeneration took its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMark {
    pub additions: usize,
    pub deletions: usize,
}

impl PendingBuffers {
    pub fn ingest(&mut self, batch: impl IntoIterator<Item = Record>) {
        self.additions.extend(batch);
    }

    pub fn mark_deleted(&mut self, id: impl Into<String>) {
        self.deletions.push(id.into());
    }

    pub fn additions(&self) -> &[Record] {
        &self.additions
    }

    pub fn deletions(&self) -> &[String] {
        &self.deletions
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }

    pub fn mark(&self) -> PendingMark {
        PendingMark {
            additions: self.additions.len(),
            deletions: self.deletions.len(),
        }
    }

    /// Drop the entries covered by `mark`.  Anything appended after the mark
    /// was taken stays queued for the next regeneration.
    pub fn drain_through(&mut self, mark: PendingMark) {
        let additions = mark.additions.min(self.additions.len());
        let deletions = mark.deletions.min(self.deletions.len());
        self.additions.drain(..additions);
        self.deletions.drain(..deletions);
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub store: RecordStore,
    /// Records from the addition batch that were new to the store.
    pub added: usize,
    /// Records removed because their id was marked deleted.
    pub deleted: usize,
}

/// Merge `additions` into `current` (first occurrence of an id wins), then
/// remove every record whose id appears in `deletions`.
///
/// Deletions run after the merge, so an id added and deleted in the same
/// batch never survives.
pub fn reconcile(current: RecordStore, additions: &[Record], deletions: &[String]) -> ReconcileOutcome {
    let mut store = current;
    let added = store.extend(additions.iter().cloned());

    let doomed: HashSet<&str> = deletions.iter().map(String::as_str).collect();
    let deleted = if doomed.is_empty() {
        0
    } else {
        store.retain(|record| !doomed.contains(record.id.as_str()))
    };

    ReconcileOutcome {
        store,
        added,
        deleted,
    }
}
