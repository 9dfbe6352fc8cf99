//! Caller-side working state for an interactive run
//!
//! The pipeline itself keeps no state between calls. A front-end that wants
//! to chain operations threads a `Workspace` through them explicitly.

use super::lineage::Lineage;
use super::partition::OutcomePartition;
use super::record::ImageRecord;

#[derive(Debug, Default)]
pub struct Workspace {
    /// The batch the next operation will run on
    pub batch: Vec<ImageRecord>,
    /// Records superseded by the last operation
    pub superseded: Vec<ImageRecord>,
    /// Records that failed in the last operation
    pub failed: Vec<ImageRecord>,
    pub lineage: Lineage,
}

impl Workspace {
    pub fn new(batch: Vec<ImageRecord>) -> Self {
        let mut lineage = Lineage::new();
        lineage.record_all(&batch);
        Self {
            batch,
            lineage,
            ..Self::default()
        }
    }

    /// Rebuild from a saved batch and its provenance
    pub fn restore(batch: Vec<ImageRecord>, lineage: Lineage) -> Self {
        Self {
            batch,
            lineage,
            ..Self::default()
        }
    }

    /// Append freshly imported records to the working batch
    pub fn add_imported(&mut self, partition: OutcomePartition) {
        self.lineage.record_all(&partition.succeeded_new);
        self.batch.extend(partition.succeeded_new);
        self.failed = partition.failed;
    }

    /// Adopt the result of a transform: the new records become the working batch
    pub fn apply(&mut self, partition: OutcomePartition) {
        self.lineage.record_all(&partition.succeeded_new);
        self.lineage.record_all(&partition.superseded_old);
        self.batch = partition.succeeded_new;
        self.superseded = partition.superseded_old;
        self.failed = partition.failed;
    }

    /// Adopt the result of an export: successes stay in the batch unchanged
    pub fn apply_export(&mut self, partition: OutcomePartition) {
        self.batch = partition.succeeded_new;
        self.superseded.clear();
        self.failed = partition.failed;
    }

    /// Step the working batch back to its parents
    pub fn revert(&mut self) -> usize {
        let parents = self.lineage.parents_of(&self.batch);
        let restored = parents.len();
        self.superseded = std::mem::replace(&mut self.batch, parents);
        self.failed.clear();
        restored
    }
}
