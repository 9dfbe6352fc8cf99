//! Image records: the unit of work flowing through the pipeline
//!
//! Records are immutable once created. A transform never edits a record in
//! place; it produces a new one that points back at its input through
//! `old_id`. That keeps the record set append-only, so batches can be cloned
//! into worker threads without any locking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TransformError;

/// Opaque unique token identifying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RecordId)
    }
}

/// Identifier of a working session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of the last transform applied to a record
///
/// Modelled as an enum so that "succeeded" and "carries an error" can never
/// both hold.
#[derive(Debug, Clone)]
pub enum RecordStatus {
    Ok,
    Failed(TransformError),
}

/// Represents a single image tracked by a session
#[derive(Debug, Clone)]
pub struct ImageRecord {
    /// Unique within the session
    pub id: RecordId,
    /// The record this one supersedes (None for imported images)
    pub old_id: Option<RecordId>,
    pub session_id: SessionId,
    /// External origin of the image (never changes)
    pub source_path: PathBuf,
    /// Location of this record's file in the working area
    pub current_path: PathBuf,
    pub status: RecordStatus,
}

impl ImageRecord {
    /// A record for an image that has not been copied into the session yet.
    /// Its `current_path` is its external source until import adopts it.
    pub fn pending_import(session_id: SessionId, source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        Self {
            id: RecordId::new(),
            old_id: None,
            session_id,
            current_path: source_path.clone(),
            source_path,
            status: RecordStatus::Ok,
        }
    }

    /// A record already present in the working area (e.g. found when resuming a session)
    pub fn existing(
        id: RecordId,
        session_id: SessionId,
        source_path: impl Into<PathBuf>,
        current_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            old_id: None,
            session_id,
            source_path: source_path.into(),
            current_path: current_path.into(),
            status: RecordStatus::Ok,
        }
    }

    /// Create the successor of this record: fresh identity, new file, same origin
    pub fn derive(&self, id: RecordId, current_path: PathBuf) -> Self {
        Self {
            id,
            old_id: Some(self.id),
            session_id: self.session_id.clone(),
            source_path: self.source_path.clone(),
            current_path,
            status: RecordStatus::Ok,
        }
    }

    /// Same record, now located inside the working area. Used only by import.
    pub fn adopt(&self, current_path: PathBuf) -> Self {
        Self {
            current_path,
            status: RecordStatus::Ok,
            ..self.clone()
        }
    }

    /// Same record, marked as failed. Everything else is left untouched.
    pub fn into_failed(self, error: TransformError) -> Self {
        Self {
            status: RecordStatus::Failed(error),
            ..self
        }
    }

    /// Whether the last transform succeeded
    pub fn succeeded(&self) -> bool {
        matches!(self.status, RecordStatus::Ok)
    }

    pub fn error(&self) -> Option<&TransformError> {
        match &self.status {
            RecordStatus::Ok => None,
            RecordStatus::Failed(err) => Some(err),
        }
    }

    /// Human name of the image, taken from its external origin
    pub fn display_name(&self) -> String {
        self.source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Extension of the current file, lowercased
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.current_path)
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

impl fmt::Display for ImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.current_path.display())?;
        if let Some(old_id) = &self.old_id {
            write!(f, " (from {})", old_id)?;
        }
        if let Some(err) = self.error() {
            write!(f, " [error: {}]", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_links_back_and_keeps_origin() {
        let session = SessionId::new();
        let original = ImageRecord::pending_import(session.clone(), "/photos/cat.png");
        let child = original.derive(RecordId::new(), PathBuf::from("/tmp/x--cat.png"));

        assert_eq!(child.old_id, Some(original.id));
        assert_ne!(child.id, original.id);
        assert_eq!(child.source_path, original.source_path);
        assert_eq!(child.session_id, session);
        assert!(child.succeeded());
    }

    #[test]
    fn test_failed_record_keeps_location() {
        let original = ImageRecord::pending_import(SessionId::new(), "/photos/dog.jpg");
        let failed = original
            .clone()
            .into_failed(TransformError::not_found("/photos/dog.jpg"));

        assert!(!failed.succeeded());
        assert!(failed.error().is_some());
        assert_eq!(failed.id, original.id);
        assert_eq!(failed.current_path, original.current_path);
    }

    #[test]
    fn test_record_id_round_trips_through_display() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_display_name_uses_source_stem() {
        let record = ImageRecord::pending_import(SessionId::new(), "/a/b/Card_01.PNG");
        assert_eq!(record.display_name(), "Card_01");
        assert_eq!(record.extension().as_deref(), Some("png"));
    }
}
