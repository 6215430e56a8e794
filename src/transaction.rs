//! Crash-safe in-place mutation of a `.docx` archive.
//!
//! The archive on disk is always either the version before a mutation or the fully
//! mutated one: a snapshot is taken first and moved back over the archive on any failure.
//! Mutations of one archive are serialized through a process-wide lock registry.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::EditorSettings;
use crate::docx::editor::PackageEditor;
use crate::docx::format::format_package;
use crate::docx::numbering::MutationReport;
use crate::docx::package::{binary_digests, extract, repack, verify_archive};
use crate::error::{DocxError, DocxResult, IoContext};

static ARCHIVE_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn registry_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Handle on one archive's mutex. The registry entry goes away with the last handle.
struct ArchiveLock {
    key: PathBuf,
    lock: Arc<Mutex<()>>,
}

fn archive_lock(path: &Path) -> ArchiveLock {
    let key = registry_key(path);
    let lock = ARCHIVE_LOCKS
        .lock()
        .entry(key.clone())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    ArchiveLock { key, lock }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let mut locks = ARCHIVE_LOCKS.lock();
        // Handles are only cloned under the registry lock, so the count is stable here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Restores the snapshot of a run that died half-way. A snapshot next to an archive that
/// still verifies is stale and removed.
pub fn recover_interrupted(archive: &Path, settings: &EditorSettings) -> DocxResult<bool> {
    let backup = settings.backup_path(archive);
    if !backup.exists() {
        return Ok(false);
    }
    let healthy = archive.exists() && verify_archive(archive).is_ok();
    if healthy {
        debug!("removing stale backup {}", backup.display());
        fs::remove_file(&backup).at(&backup)?;
        return Ok(false);
    }
    warn!(
        "restoring {} from interrupted mutation backup",
        archive.display()
    );
    fs::rename(&backup, archive).at(archive)?;
    Ok(true)
}

/// Runs `f` against the extracted package of `archive` and commits the result.
pub fn mutate_archive<T>(
    archive: &Path,
    settings: &EditorSettings,
    f: impl FnOnce(&mut PackageEditor<'_>) -> DocxResult<T>,
) -> DocxResult<T> {
    let handle = archive_lock(archive);
    let _guard = handle.lock.lock();

    recover_interrupted(archive, settings)?;
    if !archive.is_file() {
        return Err(DocxError::io(
            archive,
            io::Error::new(io::ErrorKind::NotFound, "archive not found"),
        ));
    }

    let backup = settings.backup_path(archive);
    fs::copy(archive, &backup).at(&backup)?;

    match mutate_extracted(archive, settings, f) {
        Ok(v) => {
            fs::remove_file(&backup).at(&backup)?;
            Ok(v)
        }
        Err(e) => {
            warn!("mutation of {} failed, restoring: {e}", archive.display());
            if let Err(restore) = fs::rename(&backup, archive) {
                warn!("restore of {} failed: {restore}", archive.display());
            }
            Err(e)
        }
    }
}

fn mutate_extracted<T>(
    archive: &Path,
    settings: &EditorSettings,
    f: impl FnOnce(&mut PackageEditor<'_>) -> DocxResult<T>,
) -> DocxResult<T> {
    let scratch = extract(archive)?;
    let binaries = binary_digests(scratch.root())?;

    let (value, written) = {
        let mut editor = PackageEditor::new(&scratch);
        let value = f(&mut editor)?;
        let written = editor.flush()?;
        (value, written)
    };
    if settings.reformat_all_parts {
        let n = format_package(scratch.root(), &written)?;
        debug!("reformatted {n} untouched parts");
    }
    let entries = repack(scratch.root(), archive, settings.compression_level)?;

    if settings.verify_after_repack {
        let summary = verify_archive(archive)?;
        for (name, digest) in &binaries {
            if summary.digests.get(name) != Some(digest) {
                return Err(DocxError::MalformedOutput {
                    path: archive.to_path_buf(),
                    reason: format!("binary part {name} changed during repack"),
                });
            }
        }
    }
    scratch.close()?;
    info!(
        "committed {} ({entries} entries, {} parts rewritten)",
        archive.display(),
        written.len()
    );
    Ok(value)
}

pub fn replace_paragraph_text(
    archive: &Path,
    settings: &EditorSettings,
    n: usize,
    text: &str,
) -> DocxResult<MutationReport> {
    mutate_archive(archive, settings, |ed| ed.replace_paragraph_text(n, text))
}

pub fn insert_paragraph(
    archive: &Path,
    settings: &EditorSettings,
    text: &str,
    position: Option<usize>,
) -> DocxResult<MutationReport> {
    mutate_archive(archive, settings, |ed| ed.insert_paragraph(text, position))
}

pub fn delete_paragraph(
    archive: &Path,
    settings: &EditorSettings,
    n: usize,
) -> DocxResult<MutationReport> {
    mutate_archive(archive, settings, |ed| ed.delete_paragraph(n))
}

/// `id_floor` is the highest comment id the caller already knows about.
pub fn add_comment(
    archive: &Path,
    settings: &EditorSettings,
    n: usize,
    author: &str,
    text: &str,
    id_floor: u32,
) -> DocxResult<MutationReport> {
    let at = Utc::now();
    mutate_archive(archive, settings, |ed| ed.add_comment(n, author, text, at, id_floor))
}

pub fn delete_comment(
    archive: &Path,
    settings: &EditorSettings,
    id: u32,
) -> DocxResult<MutationReport> {
    mutate_archive(archive, settings, |ed| ed.delete_comment(id))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::thread;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::{
        insert_paragraph, mutate_archive, recover_interrupted, registry_key,
        replace_paragraph_text, ARCHIVE_LOCKS,
    };
    use crate::config::EditorSettings;
    use crate::docx::fixtures::{write_docx, MEDIA_BYTES};
    use crate::docx::package::DocxPackage;
    use crate::docx::parse::parse_document;
    use crate::error::DocxError;

    fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn successful_mutation_keeps_media_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d.docx");
        write_docx(&path, &["A", "B"], true);
        let settings = EditorSettings::default();

        let report = replace_paragraph_text(&path, &settings, 1, "Alpha").expect("replace");
        assert_eq!(report.paragraph, Some(1));

        let pkg = DocxPackage::read(&path).expect("read");
        assert_eq!(pkg.get("word/media/image1.png"), Some(MEDIA_BYTES));
        let doc = String::from_utf8(pkg.require("word/document.xml").expect("doc").to_vec())
            .expect("utf8");
        assert!(doc.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
        assert_eq!(parse_document(&path).expect("parse").paragraphs[0].text, "Alpha");
        assert_eq!(dir_listing(dir.path()), vec!["d.docx"]);
    }

    #[test]
    fn failing_closure_leaves_archive_byte_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d.docx");
        write_docx(&path, &["A", "B"], true);
        let original = fs::read(&path).expect("read");

        let res: Result<(), _> = mutate_archive(&path, &EditorSettings::default(), |ed| {
            ed.insert_paragraph("half-done", None)?;
            ed.flush()?;
            Err(DocxError::ParagraphNotFound(42))
        });
        assert_matches!(res, Err(DocxError::ParagraphNotFound(42)));
        assert_eq!(fs::read(&path).expect("read"), original);
        assert_eq!(dir_listing(dir.path()), vec!["d.docx"]);
    }

    #[test]
    fn corrupt_archive_is_reported_and_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d.docx");
        fs::write(&path, b"PK\x03\x04 definitely not a zip").expect("write");
        let res = insert_paragraph(&path, &EditorSettings::default(), "x", None);
        assert_matches!(res, Err(DocxError::CorruptArchive { .. }));
        assert_eq!(fs::read(&path).expect("read"), b"PK\x03\x04 definitely not a zip");
        assert_eq!(dir_listing(dir.path()), vec!["d.docx"]);
    }

    #[test]
    fn interrupted_run_is_restored_from_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d.docx");
        write_docx(&path, &["A"], false);
        let settings = EditorSettings::default();
        let backup = settings.backup_path(&path);
        fs::copy(&path, &backup).expect("copy");
        fs::write(&path, b"half written").expect("truncate");

        assert!(recover_interrupted(&path, &settings).expect("recover"));
        assert!(!backup.exists());
        assert_eq!(parse_document(&path).expect("parse").paragraphs.len(), 1);

        fs::copy(&path, &backup).expect("copy");
        assert!(!recover_interrupted(&path, &settings).expect("stale"));
        assert!(!backup.exists());
    }

    #[test]
    fn concurrent_mutations_of_one_archive_are_serialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d.docx");
        write_docx(&path, &["A"], false);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let path = path.clone();
                thread::spawn(move || {
                    insert_paragraph(&path, &EditorSettings::default(), &format!("T{i}"), None)
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join").expect("insert");
        }
        assert_eq!(parse_document(&path).expect("parse").paragraphs.len(), 5);
        assert!(!ARCHIVE_LOCKS.lock().contains_key(&registry_key(&path)));
    }

    #[test]
    fn lock_registry_entry_is_released_after_each_mutation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d.docx");
        write_docx(&path, &["A"], false);
        let key = registry_key(&path);

        insert_paragraph(&path, &EditorSettings::default(), "B", None).expect("insert");
        assert!(!ARCHIVE_LOCKS.lock().contains_key(&key));

        let res = insert_paragraph(&path, &EditorSettings::default(), "C", Some(9));
        assert!(res.is_ok());
        let failed: Result<(), _> =
            mutate_archive(&path, &EditorSettings::default(), |_| Err(DocxError::BlankText));
        assert_matches!(failed, Err(DocxError::BlankText));
        assert!(!ARCHIVE_LOCKS.lock().contains_key(&key));
    }

    #[test]
    fn missing_archive_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let res = insert_paragraph(&dir.path().join("gone.docx"), &EditorSettings::default(), "x", None);
        assert_matches!(res, Err(DocxError::Io { .. }));
    }
}
