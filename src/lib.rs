//! Session-scoped parallel batch transformations for image collections.
//!
//! A caller opens a [`session::Session`], imports files into it, then applies
//! transforms batch by batch through [`pipeline::Pipeline`]. Every call returns
//! an [`state::OutcomePartition`]: the new records, the ones they replaced, and
//! the inputs that failed.

pub mod color;
pub mod command;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod transform;

pub use error::{ErrorKind, PipelineError, TransformError};
pub use pipeline::{ExecutionMode, ExecutorConfig, Pipeline, Transform};
pub use session::{Session, SessionManager};
pub use state::{ImageRecord, OutcomePartition, RecordId, Workspace};
