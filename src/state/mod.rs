/// State management module
///
/// This module holds the pure data model of a batch run:
/// - Image records and their identities (record.rs)
/// - The new/old/failed result split (partition.rs)
/// - The provenance index used for ancestry and revert (lineage.rs)
/// - Caller-side working state threaded between operations (workspace.rs)

pub mod lineage;
pub mod partition;
pub mod record;
pub mod workspace;

pub use lineage::Lineage;
pub use partition::OutcomePartition;
pub use record::{ImageRecord, RecordId, RecordStatus, SessionId};
pub use workspace::Workspace;
