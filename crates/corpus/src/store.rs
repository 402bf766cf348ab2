use std::collections::HashSet;

use crate::schema::Record;

/// Ordered, id-unique collection of records.  The first record inserted for
/// an id wins; later duplicates are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStore {
    records: Vec<Record>,
    seen_ids: HashSet<String>,
}

impl RecordStore {
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut store = Self::default();
        store.extend(records);
        store
    }

    /// Store holding only [`Record::placeholder`].
    pub fn placeholder() -> Self {
        Self::from_records([Record::placeholder()])
    }

    /// Returns `false` when the record was dropped: either its id was already
    /// present or it has no id at all.
    pub fn insert(&mut self, record: Record) -> bool {
        if record.id.is_empty() || self.seen_ids.contains(&record.id) {
            return false;
        }

        self.seen_ids.insert(record.id.clone());
        self.records.push(record);
        true
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) -> usize {
        let mut added = 0;
        for record in records {
            if self.insert(record) {
                added += 1;
            }
        }
        added
    }

    pub fn all(&self) -> &[Record] {
        &self.records
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Record) -> bool,
    {
        let before = self.records.len();
        self.records.retain(|record| keep(record));
        self.seen_ids = self
            .records
            .iter()
            .map(|record| record.id.clone())
            .collect();
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
