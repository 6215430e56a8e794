//! Keyed metadata records for uploaded documents, and an in-memory store that can be
//! persisted as JSON.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::docx::numbering::MutationReport;

pub type DocumentId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub filename: String,
    pub file_path: PathBuf,
    pub editable: bool,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphRecord {
    pub document_id: DocumentId,
    pub paragraph_id: usize,
    pub text: String,
    /// Cleared when the text is edited; rebuilt by reprocessing.
    pub html: Option<String>,
    pub has_images: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub document_id: DocumentId,
    pub comment_id: u32,
    pub paragraph_id: usize,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub document_id: DocumentId,
    pub rel_id: String,
    pub filename: String,
    pub path: PathBuf,
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything the document service reads from and writes to.
pub trait MetadataStore: Send + Sync {
    fn insert_document(
        &self,
        filename: &str,
        file_path: &Path,
        editable: bool,
    ) -> StoreResult<DocumentRecord>;
    fn document(&self, id: DocumentId) -> StoreResult<Option<DocumentRecord>>;
    fn documents(&self) -> StoreResult<Vec<DocumentRecord>>;
    fn set_editable(&self, id: DocumentId, editable: bool) -> StoreResult<()>;

    /// Replaces every derived record of a document (upload and reprocess).
    fn replace_parsed(
        &self,
        id: DocumentId,
        paragraphs: Vec<ParagraphRecord>,
        comments: Vec<CommentRecord>,
        images: Vec<ImageRecord>,
    ) -> StoreResult<()>;

    fn paragraphs(&self, id: DocumentId) -> StoreResult<Vec<ParagraphRecord>>;
    fn comments(&self, id: DocumentId) -> StoreResult<Vec<CommentRecord>>;
    fn images(&self, id: DocumentId) -> StoreResult<Vec<ImageRecord>>;
    fn comment(&self, id: DocumentId, comment_id: u32) -> StoreResult<Option<CommentRecord>>;
    fn max_comment_id(&self, id: DocumentId) -> StoreResult<u32>;

    /// Sets the text and clears the cached HTML. False when no such paragraph exists.
    fn update_paragraph_text(&self, id: DocumentId, n: usize, text: &str) -> StoreResult<bool>;
    fn insert_comment(&self, record: CommentRecord) -> StoreResult<()>;
    fn delete_comment(&self, id: DocumentId, comment_id: u32) -> StoreResult<bool>;
    /// Returns the previous mark, or None when the comment does not exist.
    fn set_scheduled_deletion(
        &self,
        id: DocumentId,
        comment_id: u32,
        at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<Option<DateTime<Utc>>>>;
    fn due_comments(&self, now: DateTime<Utc>) -> StoreResult<Vec<CommentRecord>>;

    /// Applies a mutation report (and the created paragraph, if any) as one unit.
    fn apply_report(
        &self,
        id: DocumentId,
        report: &MutationReport,
        created: Option<ParagraphRecord>,
    ) -> StoreResult<()>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    next_document_id: DocumentId,
    documents: BTreeMap<DocumentId, DocumentRecord>,
    paragraphs: BTreeMap<DocumentId, Vec<ParagraphRecord>>,
    comments: BTreeMap<DocumentId, Vec<CommentRecord>>,
    images: BTreeMap<DocumentId, Vec<ImageRecord>>,
}

impl StoreData {
    fn require(&self, id: DocumentId) -> StoreResult<()> {
        if self.documents.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::DocumentNotFound(id))
        }
    }

    fn apply_report(
        &mut self,
        id: DocumentId,
        report: &MutationReport,
        created: Option<ParagraphRecord>,
    ) {
        let shift: HashMap<usize, usize> = report.renumbered.iter().copied().collect();
        let paragraphs = self.paragraphs.entry(id).or_default();
        paragraphs.retain(|p| !report.removed_paragraphs.contains(&p.paragraph_id));
        for p in paragraphs.iter_mut() {
            if let Some(&new) = shift.get(&p.paragraph_id) {
                p.paragraph_id = new;
            }
        }
        if let Some(rec) = created {
            paragraphs.push(rec);
        }
        paragraphs.sort_by_key(|p| p.paragraph_id);

        let moved: HashMap<u32, usize> = report
            .moved_comments
            .iter()
            .map(|&(c, _, new)| (c, new))
            .collect();
        // The archive decides which comments died; a record is dropped only when orphaned.
        let comments = self.comments.entry(id).or_default();
        comments.retain(|c| !report.orphaned_comments.contains(&c.comment_id));
        for c in comments.iter_mut() {
            if let Some(&new) = moved.get(&c.comment_id) {
                c.paragraph_id = new;
            } else if let Some(&new) = shift.get(&c.paragraph_id) {
                c.paragraph_id = new;
            }
        }
    }
}

/// Thread-safe store kept in memory, optionally saved to a JSON file after each change.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `path` when it exists; later changes are written back to it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let data = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&text)?
        } else {
            StoreData::default()
        };
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path.to_path_buf()),
        })
    }

    fn save(&self, data: &StoreData) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, data)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        debug!("saved metadata store to {}", path.display());
        Ok(())
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> StoreResult<T>) -> StoreResult<T> {
        let mut data = self.data.write();
        let out = f(&mut *data)?;
        self.save(&data)?;
        Ok(out)
    }
}

impl MetadataStore for MemoryStore {
    fn insert_document(
        &self,
        filename: &str,
        file_path: &Path,
        editable: bool,
    ) -> StoreResult<DocumentRecord> {
        self.write(|d| {
            d.next_document_id += 1;
            let rec = DocumentRecord {
                id: d.next_document_id,
                filename: filename.to_string(),
                file_path: file_path.to_path_buf(),
                editable,
                uploaded_at: Utc::now(),
            };
            d.documents.insert(rec.id, rec.clone());
            Ok(rec)
        })
    }

    fn document(&self, id: DocumentId) -> StoreResult<Option<DocumentRecord>> {
        Ok(self.data.read().documents.get(&id).cloned())
    }

    fn documents(&self) -> StoreResult<Vec<DocumentRecord>> {
        Ok(self.data.read().documents.values().cloned().collect())
    }

    fn set_editable(&self, id: DocumentId, editable: bool) -> StoreResult<()> {
        self.write(|d| {
            let doc = d
                .documents
                .get_mut(&id)
                .ok_or(StoreError::DocumentNotFound(id))?;
            doc.editable = editable;
            Ok(())
        })
    }

    fn replace_parsed(
        &self,
        id: DocumentId,
        mut paragraphs: Vec<ParagraphRecord>,
        comments: Vec<CommentRecord>,
        images: Vec<ImageRecord>,
    ) -> StoreResult<()> {
        self.write(|d| {
            d.require(id)?;
            paragraphs.sort_by_key(|p| p.paragraph_id);
            d.paragraphs.insert(id, paragraphs);
            d.comments.insert(id, comments);
            d.images.insert(id, images);
            Ok(())
        })
    }

    fn paragraphs(&self, id: DocumentId) -> StoreResult<Vec<ParagraphRecord>> {
        Ok(self.data.read().paragraphs.get(&id).cloned().unwrap_or_default())
    }

    fn comments(&self, id: DocumentId) -> StoreResult<Vec<CommentRecord>> {
        let mut out = self.data.read().comments.get(&id).cloned().unwrap_or_default();
        out.sort_by_key(|c| c.comment_id);
        Ok(out)
    }

    fn images(&self, id: DocumentId) -> StoreResult<Vec<ImageRecord>> {
        Ok(self.data.read().images.get(&id).cloned().unwrap_or_default())
    }

    fn comment(&self, id: DocumentId, comment_id: u32) -> StoreResult<Option<CommentRecord>> {
        Ok(self
            .data
            .read()
            .comments
            .get(&id)
            .and_then(|cs| cs.iter().find(|c| c.comment_id == comment_id).cloned()))
    }

    fn max_comment_id(&self, id: DocumentId) -> StoreResult<u32> {
        Ok(self
            .data
            .read()
            .comments
            .get(&id)
            .and_then(|cs| cs.iter().map(|c| c.comment_id).max())
            .unwrap_or(0))
    }

    fn update_paragraph_text(&self, id: DocumentId, n: usize, text: &str) -> StoreResult<bool> {
        self.write(|d| {
            let Some(p) = d
                .paragraphs
                .get_mut(&id)
                .and_then(|ps| ps.iter_mut().find(|p| p.paragraph_id == n))
            else {
                return Ok(false);
            };
            p.text = text.to_string();
            p.html = None;
            Ok(true)
        })
    }

    fn insert_comment(&self, record: CommentRecord) -> StoreResult<()> {
        self.write(|d| {
            d.require(record.document_id)?;
            d.comments.entry(record.document_id).or_default().push(record);
            Ok(())
        })
    }

    fn delete_comment(&self, id: DocumentId, comment_id: u32) -> StoreResult<bool> {
        self.write(|d| {
            let Some(cs) = d.comments.get_mut(&id) else {
                return Ok(false);
            };
            let before = cs.len();
            cs.retain(|c| c.comment_id != comment_id);
            Ok(cs.len() != before)
        })
    }

    fn set_scheduled_deletion(
        &self,
        id: DocumentId,
        comment_id: u32,
        at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<Option<DateTime<Utc>>>> {
        self.write(|d| {
            let found = d
                .comments
                .get_mut(&id)
                .and_then(|cs| cs.iter_mut().find(|c| c.comment_id == comment_id));
            Ok(found.map(|c| std::mem::replace(&mut c.scheduled_deletion_at, at)))
        })
    }

    fn due_comments(&self, now: DateTime<Utc>) -> StoreResult<Vec<CommentRecord>> {
        Ok(self
            .data
            .read()
            .comments
            .values()
            .flatten()
            .filter(|c| c.scheduled_deletion_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    fn apply_report(
        &self,
        id: DocumentId,
        report: &MutationReport,
        created: Option<ParagraphRecord>,
    ) -> StoreResult<()> {
        self.write(|d| {
            d.require(id)?;
            d.apply_report(id, report, created);
            Ok(())
        })
    }
}
