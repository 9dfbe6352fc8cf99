//! Three-way split of a batch's results: new, superseded, failed

use crate::pipeline::contract::TransformOutcome;
use crate::state::record::ImageRecord;

/// The result of every batch operation
#[derive(Debug, Clone, Default)]
pub struct OutcomePartition {
    /// Records produced by this call
    pub succeeded_new: Vec<ImageRecord>,
    /// Direct predecessors of `succeeded_new`, when the transform replaced them
    pub superseded_old: Vec<ImageRecord>,
    /// Inputs that failed, carrying their error
    pub failed: Vec<ImageRecord>,
}

impl OutcomePartition {
    /// Route each raw outcome into its partition, keeping batch order.
    ///
    /// Pure: no I/O, cannot fail, and the same input always yields the same split.
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = TransformOutcome>,
    {
        let mut partition = Self::default();
        for outcome in outcomes {
            partition.push(outcome);
        }
        partition
    }

    fn push(&mut self, outcome: TransformOutcome) {
        match outcome {
            TransformOutcome::Succeeded {
                produced,
                superseded,
            } => {
                self.succeeded_new.extend(produced);
                if let Some(old) = superseded {
                    self.superseded_old.push(old);
                }
            }
            TransformOutcome::Failed(record) => self.failed.push(record),
        }
    }

    /// Total records across all three partitions
    pub fn len(&self) -> usize {
        self.succeeded_new.len() + self.superseded_old.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl FromIterator<TransformOutcome> for OutcomePartition {
    fn from_iter<T: IntoIterator<Item = TransformOutcome>>(iter: T) -> Self {
        Self::from_outcomes(iter)
    }
}
