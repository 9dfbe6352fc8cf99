//! Session working areas on disk
//!
//! Layout under the data directory:
//! - `temp/sessions/<session id>/session.json` - manifest
//! - `temp/sessions/<session id>/images/` - imported and derived images,
//!   each named `<record id>--<name>.<ext>`
//!
//! The manifest also carries the working batch and the provenance of every
//! record seen, so a resumed session continues where it stopped.
//!
//! Directory creation and teardown happen here, outside the batch hot path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{SessionError, TransformError};
use crate::state::lineage::Lineage;
use crate::state::record::{ImageRecord, RecordId, SessionId};
use crate::state::workspace::Workspace;

const TEMP_DIR: &str = "temp";
const SESSIONS_DIR: &str = "sessions";
const IMAGES_DIR: &str = "images";
const MANIFEST_FILE: &str = "session.json";

/// Separator between the record id and the human name in working-area file names
pub const ID_SEPARATOR: &str = "--";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionManifest {
    id: SessionId,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace: Option<StoredWorkspace>,
}

/// Working state as written to the manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredWorkspace {
    /// Ids of the working batch, in order
    batch: Vec<RecordId>,
    /// Every successful record seen, sorted by id
    records: Vec<StoredRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_id: Option<RecordId>,
    source_path: PathBuf,
    current_path: PathBuf,
}

impl From<&ImageRecord> for StoredRecord {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id,
            old_id: record.old_id,
            source_path: record.source_path.clone(),
            current_path: record.current_path.clone(),
        }
    }
}

impl StoredRecord {
    fn into_record(self, session_id: &SessionId) -> ImageRecord {
        ImageRecord {
            old_id: self.old_id,
            ..ImageRecord::existing(self.id, session_id.clone(), self.source_path, self.current_path)
        }
    }
}

fn read_manifest(path: &Path) -> Result<Option<SessionManifest>, SessionError> {
    match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| SessionError::Manifest {
                path: path.to_path_buf(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SessionError::io(path, e)),
    }
}

/// Write through a temporary file so a crash never leaves half a manifest
fn write_manifest(path: &Path, manifest: &SessionManifest) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(manifest).map_err(|source| SessionError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, json).map_err(|e| SessionError::io(&staging, e))?;
    fs::rename(&staging, path).map_err(|e| SessionError::io(path, e))
}

/// Owns the temp area that holds every session
#[derive(Debug, Clone)]
pub struct SessionManager {
    temp_dir: PathBuf,
}

impl SessionManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            temp_dir: data_dir.as_ref().join(TEMP_DIR),
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.temp_dir.join(SESSIONS_DIR)
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir().join(id.as_str())
    }

    /// Resume `id` if given, otherwise discard stale sessions and start a new one
    pub fn open(&self, id: Option<&str>) -> Result<Session, SessionError> {
        match id {
            Some(id) => self.resume(&SessionId::from(id)),
            None => {
                let removed = self.clear_sessions()?;
                if removed > 0 {
                    info!(removed, "Discarded stale sessions");
                }
                self.create()
            }
        }
    }

    /// Create a fresh session with its working directory in place
    pub fn create(&self) -> Result<Session, SessionError> {
        let id = SessionId::new();
        let dir = self.session_dir(&id);
        let images_dir = self.resolve_working_dir(&id)?;

        let manifest = SessionManifest {
            id: id.clone(),
            created_at: Utc::now(),
            workspace: None,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        write_manifest(&manifest_path, &manifest)?;

        info!(session = %id, dir = %dir.display(), "Created session");
        Ok(Session {
            id,
            images_dir,
            manifest_path,
            created_at: manifest.created_at,
        })
    }

    /// Reopen an existing session
    pub fn resume(&self, id: &SessionId) -> Result<Session, SessionError> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(SessionError::UnknownSession(id.to_string()));
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        // Sessions created by older runs may have no manifest
        let created_at = read_manifest(&manifest_path)?
            .map(|manifest| manifest.created_at)
            .unwrap_or_else(Utc::now);

        let images_dir = self.resolve_working_dir(id)?;
        info!(session = %id, "Resumed session");
        Ok(Session {
            id: id.clone(),
            images_dir,
            manifest_path,
            created_at,
        })
    }

    /// Working directory of a session, created if missing
    pub fn resolve_working_dir(&self, id: &SessionId) -> Result<PathBuf, SessionError> {
        let images_dir = self.session_dir(id).join(IMAGES_DIR);
        fs::create_dir_all(&images_dir).map_err(|e| SessionError::io(&images_dir, e))?;
        Ok(images_dir)
    }

    /// Ids of every session currently on disk
    pub fn list(&self) -> Result<Vec<SessionId>, SessionError> {
        let sessions_dir = self.sessions_dir();
        if !sessions_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let entries = fs::read_dir(&sessions_dir).map_err(|e| SessionError::io(&sessions_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::io(&sessions_dir, e))?;
            if entry.path().is_dir() {
                ids.push(SessionId::from(entry.file_name().to_string_lossy().as_ref()));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    /// Remove every session directory. Returns how many were removed.
    pub fn clear_sessions(&self) -> Result<usize, SessionError> {
        let ids = self.list()?;
        for id in &ids {
            let dir = self.session_dir(id);
            debug!(dir = %dir.display(), "Removing session");
            fs::remove_dir_all(&dir).map_err(|e| SessionError::io(&dir, e))?;
        }
        Ok(ids.len())
    }

    /// Remove the whole temp area. Returns false if there was nothing to remove.
    pub fn clear_temp(&self) -> Result<bool, SessionError> {
        if !self.temp_dir.is_dir() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.temp_dir).map_err(|e| SessionError::io(&self.temp_dir, e))?;
        info!(dir = %self.temp_dir.display(), "Deleted temp folder");
        Ok(true)
    }
}

/// One open session. Cheap to clone and share with workers.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    images_dir: PathBuf,
    manifest_path: PathBuf,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Directory every record file of this session lives in
    pub fn working_dir(&self) -> &Path {
        &self.images_dir
    }

    /// A token no other record of this session will ever carry
    pub fn new_unique_id(&self) -> RecordId {
        RecordId::new()
    }

    /// Where a record's file lives: `<id>--<name>.<ext>`
    pub fn output_path(&self, id: RecordId, name: &str, extension: &str) -> PathBuf {
        self.images_dir
            .join(format!("{id}{ID_SEPARATOR}{name}.{extension}"))
    }

    /// Store the working batch and its provenance in the manifest
    pub fn save_workspace(&self, workspace: &Workspace) -> Result<(), SessionError> {
        let mut records: Vec<StoredRecord> = workspace
            .lineage
            .records()
            .filter(|record| record.succeeded())
            .map(StoredRecord::from)
            .collect();
        for record in &workspace.batch {
            if workspace.lineage.get(&record.id).is_none() {
                records.push(StoredRecord::from(record));
            }
        }
        records.sort_by_key(|record| record.id);

        let manifest = SessionManifest {
            id: self.id.clone(),
            created_at: self.created_at,
            workspace: Some(StoredWorkspace {
                batch: workspace.batch.iter().map(|record| record.id).collect(),
                records,
            }),
        };
        write_manifest(&self.manifest_path, &manifest)?;
        debug!(session = %self.id, batch = workspace.batch.len(), "Saved workspace");
        Ok(())
    }

    /// The workspace last saved with `save_workspace`, if any.
    ///
    /// Batch entries whose file has gone missing are dropped with a warning.
    pub fn load_workspace(&self) -> Result<Option<Workspace>, SessionError> {
        let Some(stored) = read_manifest(&self.manifest_path)?.and_then(|manifest| manifest.workspace) else {
            return Ok(None);
        };

        let records: Vec<ImageRecord> = stored
            .records
            .into_iter()
            .map(|record| record.into_record(&self.id))
            .collect();
        let mut lineage = Lineage::new();
        lineage.record_all(&records);

        let mut batch = Vec::with_capacity(stored.batch.len());
        for id in &stored.batch {
            match lineage.get(id) {
                Some(record) if record.current_path.is_file() => batch.push(record.clone()),
                Some(record) => {
                    warn!(record = %id, path = %record.current_path.display(), "Saved record has no file")
                }
                None => warn!(record = %id, "Saved batch refers to an unknown record"),
            }
        }

        Ok(Some(Workspace::restore(batch, lineage)))
    }

    /// Rebuild records from the files already in the working area.
    ///
    /// Used for sessions that have no saved workspace. Without the manifest
    /// there is no provenance, so every file comes back as a root record.
    /// Files that do not follow the naming scheme are skipped.
    pub fn scan_records(&self) -> Result<Vec<ImageRecord>, SessionError> {
        let mut records = Vec::new();

        for entry in WalkDir::new(&self.images_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                SessionError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            match parse_file_name(&file_name) {
                Some((id, name)) => records.push(ImageRecord::existing(
                    id,
                    self.id.clone(),
                    PathBuf::from(name),
                    entry.path(),
                )),
                None => debug!(file = %file_name, "Skipping file outside naming scheme"),
            }
        }

        Ok(records)
    }
}

/// Split `<id>--<name>` into its parts
pub fn parse_file_name(file_name: &str) -> Option<(RecordId, &str)> {
    let (id, name) = file_name.split_once(ID_SEPARATOR)?;
    let id = id.parse().ok()?;
    Some((id, name))
}

/// Copy one file, creating the destination's parent directory
pub fn copy_file(source: &Path, destination: &Path) -> Result<u64, TransformError> {
    if !source.is_file() {
        return Err(TransformError::not_found(source));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| TransformError::resource(parent, "create directory", e))?;
    }
    fs::copy(source, destination).map_err(|e| TransformError::from_io(source, "copy", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_resume() {
        let data = TempDir::new().unwrap();
        let manager = SessionManager::new(data.path());

        let session = manager.create().unwrap();
        assert!(session.working_dir().is_dir());

        let resumed = manager.open(Some(session.id().as_str())).unwrap();
        assert_eq!(resumed.id(), session.id());
        assert_eq!(resumed.working_dir(), session.working_dir());
        assert_eq!(resumed.created_at(), session.created_at());
    }

    #[test]
    fn test_open_without_id_discards_old_sessions() {
        let data = TempDir::new().unwrap();
        let manager = SessionManager::new(data.path());

        let first = manager.create().unwrap();
        let second = manager.open(None).unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(manager.list().unwrap(), vec![second.id().clone()]);
    }

    #[test]
    fn test_resume_unknown_session_fails() {
        let data = TempDir::new().unwrap();
        let manager = SessionManager::new(data.path());
        let err = manager.open(Some("missing")).unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[test]
    fn test_scan_records_parses_names() {
        let data = TempDir::new().unwrap();
        let manager = SessionManager::new(data.path());
        let session = manager.create().unwrap();

        let id = session.new_unique_id();
        let path = session.output_path(id, "card", "png");
        fs::write(&path, b"not really a png").unwrap();
        fs::write(session.working_dir().join("stray.txt"), b"x").unwrap();

        let records = session.scan_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].current_path, path);
        assert_eq!(records[0].display_name(), "card");
    }

    #[test]
    fn test_workspace_survives_resume() {
        let data = TempDir::new().unwrap();
        let manager = SessionManager::new(data.path());
        let session = manager.create().unwrap();
        assert!(session.load_workspace().unwrap().is_none());

        let root = ImageRecord::existing(
            session.new_unique_id(),
            session.id().clone(),
            "/in/page.png",
            session.working_dir().join("root.png"),
        );
        let child = root.derive(session.new_unique_id(), session.working_dir().join("child.png"));
        fs::write(&root.current_path, b"a").unwrap();
        fs::write(&child.current_path, b"b").unwrap();

        let mut workspace = Workspace::new(vec![root.clone()]);
        workspace.apply(crate::state::OutcomePartition {
            succeeded_new: vec![child.clone()],
            superseded_old: vec![root.clone()],
            failed: Vec::new(),
        });
        session.save_workspace(&workspace).unwrap();

        let resumed = manager.open(Some(session.id().as_str())).unwrap();
        let mut restored = resumed.load_workspace().unwrap().unwrap();
        assert_eq!(resumed.created_at(), session.created_at());

        assert_eq!(restored.batch.len(), 1);
        assert_eq!(restored.batch[0].id, child.id);
        assert_eq!(restored.batch[0].old_id, Some(root.id));
        assert_eq!(restored.batch[0].source_path, root.source_path);

        assert_eq!(restored.revert(), 1);
        assert_eq!(restored.batch[0].id, root.id);
    }

    #[test]
    fn test_missing_batch_file_is_dropped_on_load() {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let gone = ImageRecord::existing(
            session.new_unique_id(),
            session.id().clone(),
            "/in/gone.png",
            session.working_dir().join("gone.png"),
        );

        session.save_workspace(&Workspace::new(vec![gone])).unwrap();

        let restored = session.load_workspace().unwrap().unwrap();
        assert!(restored.batch.is_empty());
        assert_eq!(restored.lineage.len(), 1);
    }

    #[test]
    fn test_clear_temp() {
        let data = TempDir::new().unwrap();
        let manager = SessionManager::new(data.path());
        manager.create().unwrap();

        assert!(manager.clear_temp().unwrap());
        assert!(!manager.clear_temp().unwrap());
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_copy_missing_source_is_not_found() {
        let data = TempDir::new().unwrap();
        let err = copy_file(&data.path().join("nope.png"), &data.path().join("out.png"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InputNotFound);
    }
}
