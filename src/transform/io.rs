//! Copying images into and out of the session

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::TransformError;
use crate::pipeline::contract::{working_stem, Derivation, ExecutionMode, Outputs, Transform};
use crate::session::{copy_file, ID_SEPARATOR};
use crate::state::record::{extension_of, ImageRecord, RecordId};

/// File extensions picked up when a directory is given as a source
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "avif", "ico", "tga", "pnm", "qoi",
];

pub fn is_image_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Expand directories into the image files beneath them, sorted by path.
///
/// Plain file arguments are kept as-is, even if missing, so that import can
/// report them as failed items.
pub fn collect_sources(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut sources = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            sources.push(input.clone());
            continue;
        }

        let before = sources.len();
        for entry in WalkDir::new(input).follow_links(true).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_image_file(entry.path()) => {
                    sources.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!(dir = %input.display(), error = %e, "Skipping unreadable entry"),
            }
        }
        debug!(dir = %input.display(), found = sources.len() - before, "Expanded directory");
    }

    sources
}

/// Copy external files into the session working area
#[derive(Debug, Clone, Default)]
pub struct Import;

impl Transform for Import {
    fn name(&self) -> &'static str {
        "import"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Io
    }

    fn derivation(&self) -> Derivation {
        Derivation::Adopt
    }

    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        let source = &record.current_path;
        if !source.is_file() {
            return Err(TransformError::not_found(source));
        }
        let destination = outputs.allocate_like_input();
        copy_file(source, &destination)?;
        Ok(())
    }
}

/// Copy the working images to a directory outside the session.
///
/// Exported names are `<prefix><name><suffix>.<ext>`, with the record id in
/// front when `with_id` is set. Records of one batch whose names would clash
/// get the id in front too, so no export overwrites another.
#[derive(Debug, Clone)]
pub struct Export {
    pub output_dir: PathBuf,
    pub with_id: bool,
    pub prefix: String,
    pub suffix: String,
    colliding: HashSet<RecordId>,
}

impl Export {
    pub fn to(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            with_id: false,
            prefix: String::new(),
            suffix: String::new(),
            colliding: HashSet::new(),
        }
    }

    fn plain_name(&self, record: &ImageRecord) -> String {
        let mut name = format!("{}{}{}", self.prefix, working_stem(record), self.suffix);
        if let Some(ext) = record.extension() {
            name.push('.');
            name.push_str(&ext);
        }
        name
    }

    pub fn destination(&self, record: &ImageRecord) -> PathBuf {
        let name = self.plain_name(record);
        if self.with_id || self.colliding.contains(&record.id) {
            self.output_dir.join(format!("{}{ID_SEPARATOR}{name}", record.id))
        } else {
            self.output_dir.join(name)
        }
    }
}

impl Transform for Export {
    fn name(&self) -> &'static str {
        "export"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Io
    }

    fn derivation(&self) -> Derivation {
        Derivation::Passthrough
    }

    fn prepare(&mut self, batch: &[ImageRecord]) {
        // Case-folded so that clashes on case-insensitive filesystems count too
        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in batch {
            *counts.entry(self.plain_name(record).to_lowercase()).or_default() += 1;
        }

        let colliding: HashSet<RecordId> = batch
            .iter()
            .filter(|record| counts.get(&self.plain_name(record).to_lowercase()).copied().unwrap_or(0) > 1)
            .map(|record| record.id)
            .collect();
        if !colliding.is_empty() {
            warn!(records = colliding.len(), "Export names collide, prefixing them with the record id");
        }
        self.colliding = colliding;
    }

    fn apply(&self, record: &ImageRecord, _outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        let destination = self.destination(record);
        copy_file(&record.current_path, &destination)?;
        debug!(record = %record.id, to = %destination.display(), "Exported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::contract::{run_unit, TransformOutcome};
    use crate::session::SessionManager;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_import_keeps_id_and_copies() {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let source = data.path().join("scan.png");
        fs::write(&source, b"bytes").unwrap();
        let pending = ImageRecord::pending_import(session.id().clone(), &source);

        let outcome = run_unit(&Import, &session, &pending);

        let TransformOutcome::Succeeded { produced, superseded } = outcome else {
            panic!("expected success");
        };
        assert!(superseded.is_none());
        assert_eq!(produced.len(), 1);
        let imported = &produced[0];
        assert_eq!(imported.id, pending.id);
        assert_eq!(imported.old_id, None);
        assert_eq!(imported.source_path, source);
        assert!(imported.current_path.starts_with(session.working_dir()));
        assert_eq!(fs::read(&imported.current_path).unwrap(), b"bytes");
        assert!(source.is_file());
    }

    #[test]
    fn test_import_missing_file_fails() {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let pending = ImageRecord::pending_import(session.id().clone(), data.path().join("gone.png"));

        let TransformOutcome::Failed(failed) = run_unit(&Import, &session, &pending) else {
            panic!("expected failure");
        };
        assert_eq!(failed.error().unwrap().kind(), ErrorKind::InputNotFound);
        assert_eq!(fs::read_dir(session.working_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_export_naming() {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let pending = ImageRecord::pending_import(session.id().clone(), "/in/card.png");
        let record = pending.adopt(session.output_path(pending.id, "card", "png"));

        let mut export = Export::to("/out");
        export.prefix = "p_".into();
        export.suffix = "_s".into();
        assert_eq!(export.destination(&record), PathBuf::from("/out/p_card_s.png"));

        export.with_id = true;
        assert_eq!(
            export.destination(&record),
            PathBuf::from(format!("/out/{}--p_card_s.png", record.id))
        );
    }

    #[test]
    fn test_export_same_stem_gets_distinct_names() {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let front = ImageRecord::pending_import(session.id().clone(), "/in/front/card.png");
        let back = ImageRecord::pending_import(session.id().clone(), "/in/back/card.png");
        let other = ImageRecord::pending_import(session.id().clone(), "/in/back/cover.png");
        let batch: Vec<ImageRecord> = [front, back, other]
            .iter()
            .map(|pending| pending.adopt(session.output_path(pending.id, &pending.display_name(), "png")))
            .collect();

        let mut export = Export::to("/out");
        export.prepare(&batch);

        assert_eq!(
            export.destination(&batch[0]),
            PathBuf::from(format!("/out/{}--card.png", batch[0].id))
        );
        assert_eq!(
            export.destination(&batch[1]),
            PathBuf::from(format!("/out/{}--card.png", batch[1].id))
        );
        assert_eq!(export.destination(&batch[2]), PathBuf::from("/out/cover.png"));
    }

    #[test]
    fn test_collect_sources_expands_directories() {
        let data = TempDir::new().unwrap();
        let dir = data.path().join("batch");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("b.png"), b"x").unwrap();
        fs::write(dir.join("a.JPG"), b"x").unwrap();
        fs::write(dir.join("notes.txt"), b"x").unwrap();
        fs::write(dir.join("nested").join("c.webp"), b"x").unwrap();
        let loose = data.path().join("missing.png");

        let sources = collect_sources(&[dir.clone(), loose.clone()]);

        assert_eq!(
            sources,
            vec![
                dir.join("a.JPG"),
                dir.join("b.png"),
                dir.join("nested").join("c.webp"),
                loose
            ]
        );
    }
}
