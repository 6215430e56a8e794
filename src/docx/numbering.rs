//! Derived paragraph numbering.
//!
//! Paragraphs carry no stored id. A direct `w:p` child of `w:body` is numbered when its
//! `w:t` text is non-blank or it holds a drawing; numbers run 1.. in document order.
//! Every consumer (upload parse, mutations, comment anchors, reports) goes through
//! [`enumerate`].

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::w;
use crate::docx::xml::unescape_attr;
use crate::error::{DocxError, DocxResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NumberedParagraph {
    pub number: usize,
    pub node: NodeId,
}

pub fn body(tree: &XmlTree) -> DocxResult<NodeId> {
    tree.root()
        .filter(|&r| tree.is_named(r, w::DOCUMENT))
        .and_then(|r| tree.child_named(r, w::BODY))
        .ok_or_else(|| DocxError::xml(&tree.name, "missing w:document/w:body"))
}

pub fn paragraph_text(tree: &XmlTree, p: NodeId) -> String {
    tree.text_of(p, w::T)
}

pub fn has_image(tree: &XmlTree, p: NodeId) -> bool {
    tree.descendants(p)
        .into_iter()
        .any(|n| tree.is_named(n, w::DRAWING) || tree.is_named(n, w::PICT))
}

pub fn is_numbered(tree: &XmlTree, p: NodeId) -> bool {
    !paragraph_text(tree, p).trim().is_empty() || has_image(tree, p)
}

pub fn enumerate(tree: &XmlTree) -> DocxResult<Vec<NumberedParagraph>> {
    let body = body(tree)?;
    let mut out = Vec::new();
    for p in tree.children_named(body, w::P) {
        if is_numbered(tree, p) {
            out.push(NumberedParagraph {
                number: out.len() + 1,
                node: p,
            });
        }
    }
    Ok(out)
}

pub fn count(tree: &XmlTree) -> DocxResult<usize> {
    Ok(enumerate(tree)?.len())
}

/// Node of paragraph `n` (1-based).
pub fn locate(tree: &XmlTree, n: usize) -> DocxResult<NodeId> {
    if n == 0 {
        return Err(DocxError::ParagraphNotFound(n));
    }
    enumerate(tree)?
        .get(n - 1)
        .map(|p| p.node)
        .ok_or(DocxError::ParagraphNotFound(n))
}

fn number_map(tree: &XmlTree) -> DocxResult<HashMap<NodeId, usize>> {
    Ok(enumerate(tree)?
        .into_iter()
        .map(|p| (p.node, p.number))
        .collect())
}

/// Number of the body paragraph that contains `node`, if that paragraph is numbered.
pub fn paragraph_of(tree: &XmlTree, node: NodeId) -> DocxResult<Option<usize>> {
    let numbers = number_map(tree)?;
    Ok(containing(tree, &numbers, node))
}

fn containing(tree: &XmlTree, numbers: &HashMap<NodeId, usize>, node: NodeId) -> Option<usize> {
    tree.ancestor_where(node, |n| numbers.contains_key(&n))
        .and_then(|p| numbers.get(&p).copied())
}

pub fn comment_id_of(tree: &XmlTree, node: NodeId) -> Option<u32> {
    tree.attr(node, w::ID)
        .and_then(|raw| unescape_attr(raw).trim().parse().ok())
}

/// Paragraph each comment is anchored to, from its range start or reference.
/// Anchors outside any numbered paragraph are left out.
pub fn comment_paragraphs(tree: &XmlTree) -> DocxResult<BTreeMap<u32, usize>> {
    let numbers = number_map(tree)?;
    let body = body(tree)?;
    let mut out = BTreeMap::new();
    for n in tree.descendants(body) {
        if !(tree.is_named(n, w::COMMENT_RANGE_START) || tree.is_named(n, w::COMMENT_REFERENCE)) {
            continue;
        }
        let Some(id) = comment_id_of(tree, n) else {
            continue;
        };
        if out.contains_key(&id) {
            continue;
        }
        if let Some(num) = containing(tree, &numbers, n) {
            out.insert(id, num);
        }
    }
    Ok(out)
}

/// What a mutation did to the derived numbering, for the metadata store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    /// Number of the paragraph the operation targeted or created (None when the created
    /// paragraph is blank and therefore unnumbered).
    pub paragraph: Option<usize>,
    /// (old, new) for every surviving paragraph whose number changed.
    pub renumbered: Vec<(usize, usize)>,
    pub removed_paragraphs: Vec<usize>,
    /// (comment id, old paragraph, new paragraph).
    pub moved_comments: Vec<(u32, usize, usize)>,
    pub orphaned_comments: Vec<u32>,
    pub comment_id: Option<u32>,
}

impl MutationReport {
    pub fn is_noop(&self) -> bool {
        self.renumbered.is_empty()
            && self.removed_paragraphs.is_empty()
            && self.moved_comments.is_empty()
            && self.orphaned_comments.is_empty()
    }
}

/// Numbering state of a document tree at one point in time.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    paragraphs: BTreeMap<NodeId, usize>,
    comments: BTreeMap<u32, usize>,
}

impl Snapshot {
    pub fn capture(tree: &XmlTree) -> DocxResult<Self> {
        Ok(Self {
            paragraphs: enumerate(tree)?
                .into_iter()
                .map(|p| (p.node, p.number))
                .collect(),
            comments: comment_paragraphs(tree)?,
        })
    }

    pub fn number_of(&self, node: NodeId) -> Option<usize> {
        self.paragraphs.get(&node).copied()
    }

    pub fn diff(before: &Snapshot, after: &Snapshot) -> MutationReport {
        let mut report = MutationReport::default();
        for (node, &old) in &before.paragraphs {
            match after.paragraphs.get(node) {
                Some(&new) if new != old => report.renumbered.push((old, new)),
                Some(_) => {}
                None => report.removed_paragraphs.push(old),
            }
        }
        for (&id, &old) in &before.comments {
            match after.comments.get(&id) {
                Some(&new) if new != old => report.moved_comments.push((id, old, new)),
                Some(_) => {}
                None => report.orphaned_comments.push(id),
            }
        }
        report.renumbered.sort_unstable();
        report.removed_paragraphs.sort_unstable();
        report
    }
}
