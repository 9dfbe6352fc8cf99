//! Provenance index over every record a session has seen
//!
//! Only the data needed to walk back through `old_id` links is kept; nothing
//! here touches the filesystem.

use std::collections::{HashMap, HashSet};

use super::record::{ImageRecord, RecordId};

#[derive(Debug, Default, Clone)]
pub struct Lineage {
    records: HashMap<RecordId, ImageRecord>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember records. Failed copies never replace a known successful record.
    pub fn record_all<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a ImageRecord>,
    {
        for record in records {
            match self.records.get(&record.id) {
                Some(known) if known.succeeded() && !record.succeeded() => {}
                _ => {
                    self.records.insert(record.id, record.clone());
                }
            }
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<&ImageRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Walk `old_id` links from `id` back to the imported original.
    ///
    /// The result starts with the record itself. The walk stops at the first
    /// link that points outside the index.
    pub fn ancestry(&self, id: &RecordId) -> Vec<&ImageRecord> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.records.get(id);

        while let Some(record) = cursor {
            if !seen.insert(record.id) {
                break;
            }
            chain.push(record);
            cursor = record.old_id.as_ref().and_then(|parent| self.records.get(parent));
        }

        chain
    }

    /// Parents of `batch`, deduplicated and in first-seen order.
    ///
    /// Records without a known parent are kept as they are, so reverting an
    /// imported image is a no-op.
    pub fn parents_of(&self, batch: &[ImageRecord]) -> Vec<ImageRecord> {
        let mut seen = HashSet::new();
        let mut parents = Vec::new();

        for record in batch {
            let parent = record
                .old_id
                .as_ref()
                .and_then(|id| self.records.get(id))
                .unwrap_or(record);
            if seen.insert(parent.id) {
                parents.push(parent.clone());
            }
        }

        parents
    }
}
