//! The shape every pipeline stage satisfies
//!
//! A transform sees one record and writes zero or more files into the
//! session through `Outputs`. `run_unit` wraps it: it turns the files into
//! records, links them to their input, and converts any `TransformError`
//! into a failed record so one bad item never aborts the batch.

use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::TransformError;
use crate::session::{Session, ID_SEPARATOR};
use crate::state::record::{ImageRecord, RecordId};

/// Which worker discipline a transform needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Copying files in or out: many lightweight blocking workers
    Io,
    /// Decode/filter/encode: bounded to the available cores
    Cpu,
}

/// How a transform's outputs relate to its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Input is brought into the session. Outputs have no `old_id`; the first
    /// one keeps the input's id.
    Adopt,
    /// Exactly one output, superseding the input
    Replace,
    /// Any number of outputs linked to the input, which is not superseded
    Split,
    /// No outputs. The input itself is the success outcome.
    Passthrough,
}

/// One image-altering operation, applied per record
pub trait Transform: Send + Sync {
    /// Name for logging
    fn name(&self) -> &'static str;

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Cpu
    }

    fn derivation(&self) -> Derivation {
        Derivation::Replace
    }

    /// Called once with the whole batch before any item is applied
    fn prepare(&mut self, _batch: &[ImageRecord]) {}

    /// Process one record, writing results to paths allocated from `outputs`.
    ///
    /// Every recoverable condition must come back as a `TransformError`.
    /// A panic here is treated as a defect and aborts the whole batch.
    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError>;
}

/// Raw result of one unit of work
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    Succeeded {
        produced: Vec<ImageRecord>,
        /// The input, when the transform replaced it
        superseded: Option<ImageRecord>,
    },
    Failed(ImageRecord),
}

impl TransformOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransformOutcome::Succeeded { .. })
    }
}

/// Hands out fresh, collision-free file paths in the session's working area
pub struct Outputs<'a> {
    session: &'a Session,
    record: &'a ImageRecord,
    derivation: Derivation,
    allocated: Vec<(RecordId, PathBuf)>,
}

impl<'a> Outputs<'a> {
    fn new(session: &'a Session, record: &'a ImageRecord, derivation: Derivation) -> Self {
        Self {
            session,
            record,
            derivation,
            allocated: Vec::new(),
        }
    }

    /// Path for a new file named after the input, with the given extension
    pub fn allocate(&mut self, extension: &str) -> PathBuf {
        self.allocate_with_suffix("", extension)
    }

    /// Like `allocate`, keeping the input's extension
    pub fn allocate_like_input(&mut self) -> PathBuf {
        let extension = self.record.extension().unwrap_or_else(|| "png".to_string());
        self.allocate(&extension)
    }

    /// Path for a new file named `<input name><suffix>.<extension>`
    pub fn allocate_with_suffix(&mut self, suffix: &str, extension: &str) -> PathBuf {
        let id = if self.derivation == Derivation::Adopt && self.allocated.is_empty() {
            self.record.id
        } else {
            self.session.new_unique_id()
        };
        let name = format!("{}{}", working_stem(self.record), suffix);
        let path = self.session.output_path(id, &name, extension);
        self.allocated.push((id, path.clone()));
        path
    }

    fn discard(&self) {
        for (_, path) in &self.allocated {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed partial output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove partial output"),
            }
        }
    }
}

/// Stem of a record's working file without the `<id>--` prefix.
///
/// Falls back to the source name for records that have not been imported yet.
pub fn working_stem(record: &ImageRecord) -> String {
    let stem = record
        .current_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned());

    match stem {
        Some(stem) => match stem.split_once(ID_SEPARATOR) {
            Some((id, rest)) if id == record.id.to_string() => rest.to_string(),
            _ => stem,
        },
        None => record.display_name(),
    }
}

/// Apply `transform` to one record, never letting a domain error escape
pub fn run_unit(transform: &dyn Transform, session: &Session, record: &ImageRecord) -> TransformOutcome {
    let derivation = transform.derivation();
    let mut outputs = Outputs::new(session, record, derivation);

    match transform.apply(record, &mut outputs) {
        Ok(()) => build_success(transform.name(), derivation, record, outputs.allocated),
        Err(err) => {
            outputs.discard();
            warn!(
                transform = transform.name(),
                record = %record.id,
                kind = %err.kind(),
                error = %err,
                "Item failed"
            );
            TransformOutcome::Failed(record.clone().into_failed(err))
        }
    }
}

fn build_success(
    name: &str,
    derivation: Derivation,
    record: &ImageRecord,
    allocated: Vec<(RecordId, PathBuf)>,
) -> TransformOutcome {
    match derivation {
        Derivation::Adopt => {
            let produced = allocated
                .into_iter()
                .map(|(id, path)| ImageRecord {
                    id,
                    ..record.adopt(path)
                })
                .collect();
            TransformOutcome::Succeeded {
                produced,
                superseded: None,
            }
        }
        Derivation::Replace => {
            assert_eq!(
                allocated.len(),
                1,
                "transform `{name}` must produce exactly one output"
            );
            let produced = allocated
                .into_iter()
                .map(|(id, path)| record.derive(id, path))
                .collect();
            TransformOutcome::Succeeded {
                produced,
                superseded: Some(record.clone()),
            }
        }
        Derivation::Split => TransformOutcome::Succeeded {
            produced: allocated
                .into_iter()
                .map(|(id, path)| record.derive(id, path))
                .collect(),
            superseded: None,
        },
        Derivation::Passthrough => {
            assert!(
                allocated.is_empty(),
                "transform `{name}` must not write into the session"
            );
            TransformOutcome::Succeeded {
                produced: vec![record.adopt(record.current_path.clone())],
                superseded: None,
            }
        }
    }
}
