//! Part-level editing session over an extracted package.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::docx::comments::{
    append_comment, check_symmetry, format_comment_date, insert_anchor, new_comments_tree,
    next_comment_id, remove_anchors, remove_comment,
};
use crate::docx::format::{write_part, FormatOutcome};
use crate::docx::mutate;
use crate::docx::numbering::{self, MutationReport};
use crate::docx::package::{
    ScratchPackage, COMMENTS_PART, CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART,
};
use crate::docx::rels::{
    ensure_override, ensure_relationship, new_content_types_tree, new_rels_tree,
    COMMENTS_CONTENT_TYPE, COMMENTS_PART_NAME, COMMENTS_REL_TYPE, COMMENTS_TARGET,
};
use crate::docx::tree::XmlTree;
use crate::error::{DocxError, DocxResult};

/// Parts are parsed on first use; every part handed out mutably is written back by
/// [`PackageEditor::flush`].
pub struct PackageEditor<'a> {
    scratch: &'a ScratchPackage,
    parts: BTreeMap<String, XmlTree>,
    touched: BTreeSet<String>,
}

impl<'a> PackageEditor<'a> {
    pub fn new(scratch: &'a ScratchPackage) -> Self {
        Self {
            scratch,
            parts: BTreeMap::new(),
            touched: BTreeSet::new(),
        }
    }

    fn load(&mut self, name: &str) -> DocxResult<bool> {
        if self.parts.contains_key(name) {
            return Ok(true);
        }
        let Some(bytes) = self.scratch.read_part(name)? else {
            return Ok(false);
        };
        let tree = XmlTree::parse(name, &bytes)?;
        self.parts.insert(name.to_string(), tree);
        Ok(true)
    }

    pub fn read(&mut self, name: &str) -> DocxResult<Option<&XmlTree>> {
        if !self.load(name)? {
            return Ok(None);
        }
        Ok(self.parts.get(name))
    }

    pub fn edit(&mut self, name: &str) -> DocxResult<Option<&mut XmlTree>> {
        if !self.load(name)? {
            return Ok(None);
        }
        self.touched.insert(name.to_string());
        Ok(self.parts.get_mut(name))
    }

    pub fn edit_or_create(
        &mut self,
        name: &str,
        init: impl FnOnce() -> XmlTree,
    ) -> DocxResult<&mut XmlTree> {
        if !self.load(name)? {
            debug!("creating part {name}");
        }
        self.touched.insert(name.to_string());
        Ok(self.parts.entry(name.to_string()).or_insert_with(init))
    }

    pub fn document(&mut self) -> DocxResult<&mut XmlTree> {
        self.edit(DOCUMENT_PART)?
            .ok_or_else(|| DocxError::PartNotFound(DOCUMENT_PART.to_string()))
    }

    /// Writes every touched part through the formatter. Returns the files written.
    pub fn flush(&mut self) -> DocxResult<HashSet<PathBuf>> {
        let mut written = HashSet::new();
        for name in &self.touched {
            let Some(tree) = self.parts.get(name) else {
                continue;
            };
            let path = self.scratch.part_path(name);
            if write_part(tree, &path)? == FormatOutcome::Compact {
                info!("{name} written unformatted");
            }
            written.insert(path);
        }
        Ok(written)
    }

    pub fn replace_paragraph_text(&mut self, n: usize, text: &str) -> DocxResult<MutationReport> {
        mutate::replace_text(self.document()?, n, text)
    }

    pub fn insert_paragraph(
        &mut self,
        text: &str,
        position: Option<usize>,
    ) -> DocxResult<MutationReport> {
        mutate::insert_paragraph(self.document()?, text, position)
    }

    /// Deletes paragraph `n` together with every comment that had an anchor inside it.
    pub fn delete_paragraph(&mut self, n: usize) -> DocxResult<MutationReport> {
        let report = mutate::delete_paragraph(self.document()?, n)?;
        if report.orphaned_comments.is_empty() {
            return Ok(report);
        }
        for &id in &report.orphaned_comments {
            // A spanning range leaves anchors in the paragraphs around the deleted one.
            remove_anchors(self.document()?, id);
            if let Some(comments) = self.edit(COMMENTS_PART)? {
                remove_comment(comments, id);
            }
        }
        self.check_comments(&report.orphaned_comments)?;
        Ok(report)
    }

    /// Adds a comment anchored to paragraph `n`. Its id is one past the highest id in
    /// either part and `id_floor`.
    pub fn add_comment(
        &mut self,
        n: usize,
        author: &str,
        text: &str,
        at: DateTime<Utc>,
        id_floor: u32,
    ) -> DocxResult<MutationReport> {
        let p = numbering::locate(self.document()?, n)?;
        self.load(COMMENTS_PART)?;
        let id = {
            let doc = self
                .parts
                .get(DOCUMENT_PART)
                .ok_or_else(|| DocxError::PartNotFound(DOCUMENT_PART.to_string()))?;
            next_comment_id(self.parts.get(COMMENTS_PART), doc, id_floor)
        };

        let comments = self.edit_or_create(COMMENTS_PART, new_comments_tree)?;
        append_comment(comments, id, author, &format_comment_date(at), text)?;
        insert_anchor(self.document()?, p, id);

        let rels = self.edit_or_create(DOCUMENT_RELS_PART, new_rels_tree)?;
        ensure_relationship(rels, COMMENTS_REL_TYPE, COMMENTS_TARGET)?;
        let types = self.edit_or_create(CONTENT_TYPES_PART, new_content_types_tree)?;
        ensure_override(types, COMMENTS_PART_NAME, COMMENTS_CONTENT_TYPE)?;

        self.check_comments(&[id])?;
        info!("comment {id} anchored to paragraph {n}");
        Ok(MutationReport {
            paragraph: Some(n),
            comment_id: Some(id),
            ..Default::default()
        })
    }

    pub fn delete_comment(&mut self, id: u32) -> DocxResult<MutationReport> {
        let paragraph = numbering::comment_paragraphs(self.document()?)?.get(&id).copied();
        let in_part = match self.edit(COMMENTS_PART)? {
            Some(comments) => remove_comment(comments, id),
            None => false,
        };
        let anchors = remove_anchors(self.document()?, id);
        if !in_part && anchors == 0 {
            return Err(DocxError::CommentNotFound(id));
        }
        self.check_comments(&[id])?;
        Ok(MutationReport {
            paragraph,
            comment_id: Some(id),
            ..Default::default()
        })
    }

    fn check_comments(&mut self, ids: &[u32]) -> DocxResult<()> {
        self.load(COMMENTS_PART)?;
        let doc = self
            .parts
            .get(DOCUMENT_PART)
            .ok_or_else(|| DocxError::PartNotFound(DOCUMENT_PART.to_string()))?;
        check_symmetry(self.parts.get(COMMENTS_PART), doc, ids)
    }
}
