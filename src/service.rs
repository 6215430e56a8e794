//! Document-level operations: the archive mutations of [`crate::transaction`] kept in step
//! with the metadata store, behind an access policy.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::EditorSettings;
use crate::docx::images::extract_package_images;
use crate::docx::numbering::MutationReport;
use crate::docx::package::{verify_archive, DocxPackage};
use crate::docx::parse::{parse_package, ParsedDocument};
use crate::error::{DocxError, IoContext};
use crate::store::{
    CommentRecord, DocumentId, DocumentRecord, ImageRecord, MetadataStore, ParagraphRecord,
    StoreError,
};
use crate::transaction;

pub const DOCUMENTS_DIR: &str = "documents";
pub const IMAGES_DIR: &str = "document_images";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    ReadWrite,
    CommentOnly,
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Upload,
    Edit,
    Comment,
    Export,
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadWrite => "read-write",
            Self::CommentOnly => "comment-only",
            Self::Full => "full",
        })
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Edit => "edit",
            Self::Comment => "comment",
            Self::Export => "export",
        })
    }
}

impl AccessPolicy {
    pub fn allows(self, cap: Capability) -> bool {
        !(self == Self::CommentOnly && cap == Capability::Edit)
    }

    pub fn check(self, cap: Capability) -> Result<(), EditorError> {
        if self.allows(cap) {
            Ok(())
        } else {
            Err(EditorError::NotPermitted {
                policy: self,
                capability: cap,
            })
        }
    }

    /// Whether documents uploaded under this policy may be edited later.
    pub fn uploads_editable(self) -> bool {
        self != Self::CommentOnly
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("{capability} is not permitted under the {policy} policy")]
    NotPermitted {
        policy: AccessPolicy,
        capability: Capability,
    },

    #[error("document {0} is not editable")]
    NotEditable(DocumentId),

    #[error("comment {0} is not scheduled for deletion")]
    NotScheduled(u32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Docx(#[from] DocxError),
}

impl EditorError {
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::DocumentNotFound(_)
            | Self::NotPermitted { .. }
            | Self::NotEditable(_)
            | Self::NotScheduled(_) => true,
            Self::Docx(e) => e.is_client_error(),
            Self::Store(_) => false,
        }
    }
}

pub type EditorResult<T> = Result<T, EditorError>;

/// Whether the archive and the store agree after an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Consistency {
    Full,
    /// The store was updated although the archive could not be.
    Partial { reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ComplianceVerdict {
    Compliant { score: f32 },
    NotCompliant { score: f32 },
    Unknown,
}

/// Decides whether an edit satisfies the comment attached to the edited paragraph.
pub trait ComplianceChecker: Send + Sync {
    fn check(&self, comment: &str, before: &str, after: &str) -> ComplianceVerdict;
}

impl<F> ComplianceChecker for F
where
    F: Fn(&str, &str, &str) -> ComplianceVerdict + Send + Sync,
{
    fn check(&self, comment: &str, before: &str, after: &str) -> ComplianceVerdict {
        self(comment, before, after)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCompliant;

impl ComplianceChecker for NeverCompliant {
    fn check(&self, _comment: &str, _before: &str, _after: &str) -> ComplianceVerdict {
        ComplianceVerdict::Unknown
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScheduledDeletion {
    pub comment_id: u32,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub report: MutationReport,
    pub consistency: Consistency,
    pub scheduled: Vec<ScheduledDeletion>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadOutcome {
    pub document: DocumentRecord,
    pub paragraphs: usize,
    pub comments: usize,
    pub images: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentView {
    pub document: DocumentRecord,
    pub paragraphs: Vec<ParagraphRecord>,
    pub comments: Vec<CommentRecord>,
    pub images: Vec<ImageRecord>,
}

/// Archive failures that still let the store go ahead.
fn allows_store_only(e: &DocxError) -> bool {
    match e {
        DocxError::CorruptArchive { .. } => true,
        DocxError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

pub fn export_name(filename: &str) -> String {
    if filename.to_ascii_lowercase().ends_with(".docx") {
        format!("edited_{filename}")
    } else {
        format!("edited_{filename}.docx")
    }
}

pub struct DocumentService {
    store: Arc<dyn MetadataStore>,
    settings: EditorSettings,
    policy: AccessPolicy,
    checker: Box<dyn ComplianceChecker>,
    media_root: PathBuf,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        settings: EditorSettings,
        policy: AccessPolicy,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            settings,
            policy,
            checker: Box::new(NeverCompliant),
            media_root: media_root.into(),
        }
    }

    pub fn with_checker(mut self, checker: impl ComplianceChecker + 'static) -> Self {
        self.checker = Box::new(checker);
        self
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    fn document(&self, id: DocumentId) -> EditorResult<DocumentRecord> {
        self.store
            .document(id)?
            .ok_or(EditorError::DocumentNotFound(id))
    }

    /// Loads a document for an edit. The full policy unlocks documents uploaded elsewhere.
    fn editable_document(&self, id: DocumentId) -> EditorResult<DocumentRecord> {
        self.policy.check(Capability::Edit)?;
        let mut doc = self.document(id)?;
        if !doc.editable {
            if self.policy != AccessPolicy::Full {
                return Err(EditorError::NotEditable(id));
            }
            self.store.set_editable(id, true)?;
            doc.editable = true;
        }
        Ok(doc)
    }

    /// Stores `bytes` under the media root and indexes its paragraphs, comments and images.
    pub fn upload(&self, filename: &str, bytes: &[u8]) -> EditorResult<UploadOutcome> {
        self.policy.check(Capability::Upload)?;
        let dir = self.media_root.join(DOCUMENTS_DIR);
        fs::create_dir_all(&dir).at(&dir)?;

        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let (mut file, path) = tempfile::Builder::new()
            .prefix(&format!("{stem}_"))
            .suffix(".docx")
            .tempfile_in(&dir)
            .at(&dir)?
            .keep()
            .map_err(|e| DocxError::io(&dir, e.error))?;
        file.write_all(bytes).at(&path)?;
        drop(file);

        let pkg = match DocxPackage::read(&path) {
            Ok(pkg) => pkg,
            Err(e) => {
                warn!("rejecting upload {filename}: {e}");
                if let Err(rm) = fs::remove_file(&path) {
                    warn!("could not remove {}: {rm}", path.display());
                }
                return Err(e.into());
            }
        };
        let document = self
            .store
            .insert_document(filename, &path, self.policy.uploads_editable())?;
        let parsed = self.index(&document, &pkg)?;
        info!(
            "uploaded {filename} as document {} ({} paragraphs, {} comments)",
            document.id,
            parsed.paragraphs.len(),
            parsed.comments.len()
        );
        Ok(UploadOutcome {
            paragraphs: parsed.paragraphs.len(),
            comments: parsed.comments.len(),
            images: self.store.images(document.id)?.len(),
            document,
        })
    }

    /// Re-reads the archive and replaces every derived record.
    pub fn reprocess(&self, id: DocumentId) -> EditorResult<ParsedDocument> {
        let doc = self.document(id)?;
        let pkg = DocxPackage::read(&doc.file_path)?;
        self.index(&doc, &pkg)
    }

    fn index(&self, doc: &DocumentRecord, pkg: &DocxPackage) -> EditorResult<ParsedDocument> {
        let dest = self.media_root.join(IMAGES_DIR).join(doc.id.to_string());
        let images = extract_package_images(pkg, &dest)?;
        let parsed = parse_package(pkg, Some(&images))?;

        let paragraphs = parsed
            .paragraphs
            .iter()
            .map(|p| ParagraphRecord {
                document_id: doc.id,
                paragraph_id: p.number,
                text: p.text.clone(),
                html: Some(p.html.clone()),
                has_images: p.has_images,
            })
            .collect();
        let now = Utc::now();
        let comments = parsed
            .comments
            .iter()
            .map(|c| {
                if !c.anchor_resolved {
                    warn!(
                        "comment {} of document {} has no anchor; attached to paragraph {}",
                        c.id, doc.id, c.paragraph
                    );
                }
                CommentRecord {
                    document_id: doc.id,
                    comment_id: c.id,
                    paragraph_id: c.paragraph,
                    author: c.author.clone(),
                    text: c.text.clone(),
                    created_at: c
                        .date
                        .as_deref()
                        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or(now),
                    scheduled_deletion_at: None,
                }
            })
            .collect();
        let images = images
            .into_iter()
            .map(|i| ImageRecord {
                document_id: doc.id,
                rel_id: i.rel_id,
                filename: i.filename,
                path: i.path,
                content_type: i.content_type,
            })
            .collect();
        self.store.replace_parsed(doc.id, paragraphs, comments, images)?;
        Ok(parsed)
    }

    /// Rewrites paragraph `n`. Comments on it whose request the edit satisfies are
    /// scheduled for deletion.
    pub fn edit_paragraph(&self, id: DocumentId, n: usize, text: &str) -> EditorResult<EditOutcome> {
        let doc = self.editable_document(id)?;
        if text.trim().is_empty() {
            return Err(DocxError::BlankText.into());
        }
        let before = self
            .store
            .paragraphs(id)?
            .into_iter()
            .find(|p| p.paragraph_id == n)
            .map(|p| p.text)
            .unwrap_or_default();

        let (report, consistency) =
            match transaction::replace_paragraph_text(&doc.file_path, &self.settings, n, text) {
                Ok(report) => (report, Consistency::Full),
                Err(e) if allows_store_only(&e) => {
                    warn!("paragraph {n} of document {id} updated in the store only: {e}");
                    let report = MutationReport {
                        paragraph: Some(n),
                        ..Default::default()
                    };
                    (report, Consistency::Partial { reason: e.to_string() })
                }
                Err(e) => return Err(e.into()),
            };

        if !self.store.update_paragraph_text(id, n, text)? {
            if consistency != Consistency::Full {
                return Err(DocxError::ParagraphNotFound(n).into());
            }
            warn!("paragraph {n} of document {id} missing from the store; reprocess to resync");
        }

        let scheduled = self.schedule_compliant(id, n, &before, text)?;
        Ok(EditOutcome {
            report,
            consistency,
            scheduled,
        })
    }

    fn schedule_compliant(
        &self,
        id: DocumentId,
        n: usize,
        before: &str,
        after: &str,
    ) -> EditorResult<Vec<ScheduledDeletion>> {
        let delay = chrono::Duration::from_std(self.settings.deletion_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut scheduled = Vec::new();
        for c in self.store.comments(id)? {
            if c.paragraph_id != n || c.scheduled_deletion_at.is_some() {
                continue;
            }
            match self.checker.check(&c.text, before, after) {
                ComplianceVerdict::Compliant { score } => {
                    let at = Utc::now() + delay;
                    self.store.set_scheduled_deletion(id, c.comment_id, Some(at))?;
                    info!("comment {} satisfied (score {score:.2}); deleting at {at}", c.comment_id);
                    scheduled.push(ScheduledDeletion {
                        comment_id: c.comment_id,
                        at,
                    });
                }
                ComplianceVerdict::NotCompliant { score } => {
                    info!("comment {} not yet satisfied (score {score:.2})", c.comment_id);
                }
                ComplianceVerdict::Unknown => {}
            }
        }
        Ok(scheduled)
    }

    pub fn insert_paragraph(
        &self,
        id: DocumentId,
        text: &str,
        position: Option<usize>,
    ) -> EditorResult<MutationReport> {
        let doc = self.editable_document(id)?;
        let report = transaction::insert_paragraph(&doc.file_path, &self.settings, text, position)?;
        let created = report.paragraph.map(|n| ParagraphRecord {
            document_id: id,
            paragraph_id: n,
            text: text.to_string(),
            html: None,
            has_images: false,
        });
        self.store.apply_report(id, &report, created)?;
        Ok(report)
    }

    pub fn delete_paragraph(&self, id: DocumentId, n: usize) -> EditorResult<MutationReport> {
        let doc = self.editable_document(id)?;
        let report = transaction::delete_paragraph(&doc.file_path, &self.settings, n)?;
        self.store.apply_report(id, &report, None)?;
        Ok(report)
    }

    /// `author` falls back to the configured default.
    pub fn add_comment(
        &self,
        id: DocumentId,
        n: usize,
        author: Option<&str>,
        text: &str,
    ) -> EditorResult<CommentRecord> {
        self.policy.check(Capability::Comment)?;
        if text.trim().is_empty() {
            return Err(DocxError::BlankText.into());
        }
        let doc = self.document(id)?;
        let author = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.settings.default_author.as_str());
        let floor = self.store.max_comment_id(id)?;

        let report =
            transaction::add_comment(&doc.file_path, &self.settings, n, author, text, floor)?;
        let comment_id = report
            .comment_id
            .ok_or_else(|| DocxError::xml("word/comments.xml", "no comment id allocated"))?;
        let record = CommentRecord {
            document_id: id,
            comment_id,
            paragraph_id: n,
            author: author.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            scheduled_deletion_at: None,
        };
        self.store.insert_comment(record.clone())?;
        Ok(record)
    }

    pub fn delete_comment(&self, id: DocumentId, comment_id: u32) -> EditorResult<EditOutcome> {
        self.policy.check(Capability::Comment)?;
        let doc = self.document(id)?;
        let known = self.store.comment(id, comment_id)?.is_some();

        let (report, consistency) =
            match transaction::delete_comment(&doc.file_path, &self.settings, comment_id) {
                Ok(report) => (report, Consistency::Full),
                Err(e)
                    if allows_store_only(&e)
                        || (known && matches!(e, DocxError::CommentNotFound(_))) =>
                {
                    warn!("comment {comment_id} of document {id} deleted from the store only: {e}");
                    let report = MutationReport {
                        comment_id: Some(comment_id),
                        ..Default::default()
                    };
                    (report, Consistency::Partial { reason: e.to_string() })
                }
                Err(e) => return Err(e.into()),
            };

        if !self.store.delete_comment(id, comment_id)? {
            if consistency != Consistency::Full {
                return Err(DocxError::CommentNotFound(comment_id).into());
            }
            warn!("comment {comment_id} of document {id} was only in the archive");
        }
        Ok(EditOutcome {
            report,
            consistency,
            scheduled: Vec::new(),
        })
    }

    /// Clears a pending deletion and returns the time it was due.
    pub fn cancel_scheduled_deletion(
        &self,
        id: DocumentId,
        comment_id: u32,
    ) -> EditorResult<DateTime<Utc>> {
        self.policy.check(Capability::Comment)?;
        self.document(id)?;
        let comment = self
            .store
            .comment(id, comment_id)?
            .ok_or(DocxError::CommentNotFound(comment_id))?;
        if comment.scheduled_deletion_at.is_none() {
            return Err(EditorError::NotScheduled(comment_id));
        }
        match self.store.set_scheduled_deletion(id, comment_id, None)? {
            Some(Some(at)) => {
                info!("cancelled deletion of comment {comment_id} (was due {at})");
                Ok(at)
            }
            Some(None) => Err(EditorError::NotScheduled(comment_id)),
            None => Err(DocxError::CommentNotFound(comment_id).into()),
        }
    }

    /// Verifies the archive and copies it into `dest_dir` as `edited_<filename>`.
    pub fn export(&self, id: DocumentId, dest_dir: &Path) -> EditorResult<PathBuf> {
        self.policy.check(Capability::Export)?;
        let doc = self.document(id)?;
        verify_archive(&doc.file_path)?;
        fs::create_dir_all(dest_dir).at(dest_dir)?;
        let dest = dest_dir.join(export_name(&doc.filename));
        fs::copy(&doc.file_path, &dest).at(&dest)?;
        info!("exported document {id} to {}", dest.display());
        Ok(dest)
    }

    pub fn list(&self) -> EditorResult<Vec<DocumentRecord>> {
        Ok(self.store.documents()?)
    }

    pub fn view(&self, id: DocumentId) -> EditorResult<DocumentView> {
        Ok(DocumentView {
            document: self.document(id)?,
            paragraphs: self.store.paragraphs(id)?,
            comments: self.store.comments(id)?,
            images: self.store.images(id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::{
        export_name, AccessPolicy, ComplianceVerdict, Consistency, DocumentService, EditorError,
    };
    use crate::config::EditorSettings;
    use crate::docx::fixtures::{docx_bytes, FixtureDocx};
    use crate::docx::parse::parse_document;
    use crate::error::DocxError;
    use crate::store::{MemoryStore, MetadataStore};

    fn service(root: &Path, policy: AccessPolicy) -> DocumentService {
        DocumentService::new(
            Arc::new(MemoryStore::new()),
            EditorSettings::default(),
            policy,
            root,
        )
    }

    fn texts(svc: &DocumentService, id: u64) -> Vec<String> {
        svc.store()
            .paragraphs(id)
            .expect("paragraphs")
            .into_iter()
            .map(|p| p.text)
            .collect()
    }

    #[test]
    fn upload_indexes_paragraphs_comments_and_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), AccessPolicy::ReadWrite);
        let bytes = FixtureDocx::new(&["Intro", "", "Body"])
            .with_media()
            .with_comment(4, 2, "ann", "tighten")
            .bytes();

        let up = svc.upload("report.docx", &bytes).expect("upload");
        assert_eq!((up.paragraphs, up.comments, up.images), (2, 1, 1));
        assert!(up.document.editable);
        assert!(up.document.file_path.starts_with(dir.path().join("documents")));
        let view = svc.view(up.document.id).expect("view");
        assert_eq!(view.comments[0].paragraph_id, 2);
        assert!(view.images[0].path.exists());
    }

    #[test]
    fn corrupt_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), AccessPolicy::ReadWrite);
        assert_matches!(
            svc.upload("bad.docx", b"not a zip"),
            Err(EditorError::Docx(DocxError::CorruptArchive { .. }))
        );
        assert!(svc.list().expect("list").is_empty());
        let left = fs::read_dir(dir.path().join("documents")).expect("dir").count();
        assert_eq!(left, 0);
    }

    #[test]
    fn comment_only_policy_refuses_edits_but_allows_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), AccessPolicy::CommentOnly);
        let id = svc
            .upload("a.docx", &docx_bytes(&["A", "B"], false))
            .expect("upload")
            .document
            .id;
        assert_matches!(
            svc.edit_paragraph(id, 1, "x"),
            Err(EditorError::NotPermitted { .. })
        );
        let c = svc.add_comment(id, 2, None, "note").expect("comment");
        assert_eq!((c.comment_id, c.author.as_str()), (1, "Anonymous"));
    }

    #[test]
    fn full_policy_unlocks_read_only_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        let commenter = DocumentService::new(
            store.clone(),
            EditorSettings::default(),
            AccessPolicy::CommentOnly,
            dir.path(),
        );
        let id = commenter
            .upload("a.docx", &docx_bytes(&["A"], false))
            .expect("upload")
            .document
            .id;

        let editor = DocumentService::new(
            store.clone(),
            EditorSettings::default(),
            AccessPolicy::ReadWrite,
            dir.path(),
        );
        assert_matches!(editor.insert_paragraph(id, "B", None), Err(EditorError::NotEditable(_)));

        let full =
            DocumentService::new(store, EditorSettings::default(), AccessPolicy::Full, dir.path());
        full.insert_paragraph(id, "B", None).expect("insert");
        assert_eq!(texts(&full, id), vec!["A", "B"]);
        assert!(full.view(id).expect("view").document.editable);
    }

    #[test]
    fn insert_and_delete_keep_store_in_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), AccessPolicy::ReadWrite);
        let bytes = FixtureDocx::new(&["Intro", "Body", "Conclusion"])
            .with_comment(1, 1, "a", "on body")
            .bytes();
        let id = svc.upload("a.docx", &bytes).expect("upload").document.id;

        svc.insert_paragraph(id, "Inserted", Some(2)).expect("insert");
        assert_eq!(texts(&svc, id), vec!["Intro", "Inserted", "Body", "Conclusion"]);
        assert_eq!(svc.store().comment(id, 1).expect("get").expect("c").paragraph_id, 3);

        svc.delete_paragraph(id, 1).expect("delete");
        assert_eq!(texts(&svc, id), vec!["Inserted", "Body", "Conclusion"]);
        assert_eq!(svc.store().comment(id, 1).expect("get").expect("c").paragraph_id, 2);

        let path = svc.view(id).expect("view").document.file_path;
        let parsed = parse_document(&path).expect("parse");
        assert_eq!(parsed.comments[0].paragraph, 2);
    }

    #[test]
    fn compliant_edit_schedules_and_cancel_restores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = EditorSettings::default();
        settings.deletion_delay = Duration::from_secs(60);
        let svc = DocumentService::new(
            Arc::new(MemoryStore::new()),
            settings,
            AccessPolicy::ReadWrite,
            dir.path(),
        )
        .with_checker(|_c: &str, _b: &str, after: &str| {
            if after.contains("short") {
                ComplianceVerdict::Compliant { score: 0.9 }
            } else {
                ComplianceVerdict::NotCompliant { score: 0.1 }
            }
        });
        let bytes = FixtureDocx::new(&["A long paragraph", "B"])
            .with_comment(1, 0, "rev", "make it short")
            .bytes();
        let id = svc.upload("a.docx", &bytes).expect("upload").document.id;

        let out = svc.edit_paragraph(id, 1, "still long").expect("edit");
        assert!(out.scheduled.is_empty());
        let out = svc.edit_paragraph(id, 1, "A short one").expect("edit");
        assert_eq!(out.consistency, Consistency::Full);
        assert_eq!(out.scheduled.len(), 1);

        let due = svc.cancel_scheduled_deletion(id, 1).expect("cancel");
        assert_eq!(due, out.scheduled[0].at);
        assert_matches!(svc.cancel_scheduled_deletion(id, 1), Err(EditorError::NotScheduled(1)));
    }

    #[test]
    fn broken_archive_gives_partial_consistency() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), AccessPolicy::ReadWrite);
        let bytes = FixtureDocx::new(&["A", "B"]).with_comment(2, 1, "a", "x").bytes();
        let id = svc.upload("a.docx", &bytes).expect("upload").document.id;
        let path = svc.view(id).expect("view").document.file_path;
        fs::write(&path, b"garbage").expect("break");

        let out = svc.edit_paragraph(id, 1, "Alpha").expect("edit");
        assert_matches!(out.consistency, Consistency::Partial { .. });
        assert_eq!(texts(&svc, id), vec!["Alpha", "B"]);
        assert_eq!(fs::read(&path).expect("read"), b"garbage");

        fs::remove_file(&path).expect("remove");
        let out = svc.delete_comment(id, 2).expect("delete");
        assert_matches!(out.consistency, Consistency::Partial { .. });
        assert!(svc.store().comments(id).expect("comments").is_empty());
        assert_matches!(
            svc.delete_comment(id, 2),
            Err(EditorError::Docx(DocxError::CommentNotFound(2)))
        );
    }

    #[test]
    fn export_verifies_and_names_the_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), AccessPolicy::ReadWrite);
        let id = svc
            .upload("Report.DOCX", &docx_bytes(&["A"], true))
            .expect("upload")
            .document
            .id;
        let out = svc.export(id, &dir.path().join("out")).expect("export");
        assert_eq!(out.file_name().and_then(|n| n.to_str()), Some("edited_Report.DOCX"));
        assert_eq!(export_name("notes"), "edited_notes.docx");
        assert_matches!(svc.export(99, dir.path()), Err(EditorError::DocumentNotFound(99)));
    }
}
