use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures of the document-surgery layer.
#[derive(Debug, Error)]
pub enum DocxError {
    #[error("corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("part not found: {0}")]
    PartNotFound(String),

    #[error("paragraph {0} not found")]
    ParagraphNotFound(usize),

    #[error("comment {0} not found")]
    CommentNotFound(u32),

    #[error("cannot delete the last paragraph")]
    LastParagraph,

    #[error("text is blank")]
    BlankText,

    #[error("malformed output in {path}: {reason}")]
    MalformedOutput { path: PathBuf, reason: String },

    #[error("xml error in {part}: {reason}")]
    Xml { part: String, reason: String },

    #[error("comment {0} is not anchored consistently between comments.xml and document.xml")]
    CommentAnchorMismatch(u32),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DocxError {
    pub fn corrupt(path: &Path, reason: impl ToString) -> Self {
        Self::CorruptArchive {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn xml(part: &str, reason: impl ToString) -> Self {
        Self::Xml {
            part: part.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Not-found and rejected-request conditions, as opposed to server faults.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ParagraphNotFound(_)
                | Self::CommentNotFound(_)
                | Self::LastParagraph
                | Self::BlankText
        )
    }
}

pub type DocxResult<T> = Result<T, DocxError>;

/// Helper mirroring `anyhow::Context` for plain io results.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> DocxResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> DocxResult<T> {
        self.map_err(|e| DocxError::io(path, e))
    }
}
