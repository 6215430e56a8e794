//! `word/comments.xml` and the comment anchors in `word/document.xml`.
//!
//! A comment created here is anchored by a triad inside one body paragraph:
//! `w:commentRangeStart` before the paragraph content, `w:commentRangeEnd` after it and a
//! run holding `w:commentReference`. Deletion removes every anchor element carrying the id,
//! wherever it sits in the tree.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::docx::mutate::content_start;
use crate::docx::numbering::comment_id_of;
use crate::docx::package::COMMENTS_PART;
use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::w;
use crate::docx::xml::{escape_attr, unescape_attr};
use crate::error::{DocxError, DocxResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommentEntry {
    pub id: u32,
    pub author: String,
    pub date: Option<String>,
    pub initials: Option<String>,
    /// Body paragraphs joined with newlines.
    pub text: String,
}

pub fn new_comments_tree() -> XmlTree {
    XmlTree::with_root(
        COMMENTS_PART,
        w::COMMENTS,
        vec![
            ("xmlns:w".to_string(), w::NS.to_string()),
            ("xmlns:r".to_string(), w::R_NS.to_string()),
        ],
    )
}

/// Comment timestamp: UTC, ISO-8601, whole seconds.
pub fn format_comment_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn comment_nodes(tree: &XmlTree) -> Vec<NodeId> {
    match tree.root() {
        Some(root) => tree.children_named(root, w::COMMENT).collect(),
        None => Vec::new(),
    }
}

fn opt_attr(tree: &XmlTree, id: NodeId, key: &str) -> Option<String> {
    tree.attr(id, key).map(|v| unescape_attr(v).into_owned())
}

pub fn read_comments(tree: &XmlTree) -> Vec<CommentEntry> {
    comment_nodes(tree)
        .into_iter()
        .filter_map(|c| {
            let id = comment_id_of(tree, c)?;
            let text = tree
                .descendants_named(c, w::P)
                .into_iter()
                .map(|p| tree.text_of(p, w::T))
                .collect::<Vec<_>>()
                .join("\n");
            Some(CommentEntry {
                id,
                author: opt_attr(tree, c, w::AUTHOR).unwrap_or_default(),
                date: opt_attr(tree, c, w::DATE),
                initials: opt_attr(tree, c, w::INITIALS),
                text,
            })
        })
        .collect()
}

pub fn comment_ids(tree: &XmlTree) -> BTreeSet<u32> {
    comment_nodes(tree)
        .into_iter()
        .filter_map(|c| comment_id_of(tree, c))
        .collect()
}

pub(crate) fn is_anchor(doc: &XmlTree, n: NodeId) -> bool {
    doc.is_named(n, w::COMMENT_RANGE_START)
        || doc.is_named(n, w::COMMENT_RANGE_END)
        || doc.is_named(n, w::COMMENT_REFERENCE)
}

/// Ids referenced by any anchor element in the document.
pub fn anchor_ids(doc: &XmlTree) -> BTreeSet<u32> {
    doc.descendants(crate::docx::tree::DOCUMENT)
        .into_iter()
        .filter(|&n| is_anchor(doc, n))
        .filter_map(|n| comment_id_of(doc, n))
        .collect()
}

/// One past the highest id seen in either part or supplied by the caller.
pub fn next_comment_id(comments: Option<&XmlTree>, doc: &XmlTree, floor: u32) -> u32 {
    let from_part = comments.map(comment_ids).unwrap_or_default();
    let max = from_part
        .into_iter()
        .chain(anchor_ids(doc))
        .chain(std::iter::once(floor))
        .max()
        .unwrap_or(0);
    max + 1
}

fn text_run(tree: &mut XmlTree, text: &str) -> NodeId {
    let r = tree.create_element(w::R, Vec::new());
    let mut attrs = Vec::new();
    if text.trim() != text {
        attrs.push(("xml:space".to_string(), "preserve".to_string()));
    }
    let t = tree.create_element(w::T, attrs);
    let txt = tree.create_text(text);
    tree.append_child(t, txt);
    tree.append_child(r, t);
    r
}

pub fn append_comment(
    tree: &mut XmlTree,
    id: u32,
    author: &str,
    date: &str,
    text: &str,
) -> DocxResult<NodeId> {
    let root = tree
        .root()
        .ok_or_else(|| DocxError::xml(COMMENTS_PART, "no root element"))?;
    let comment = tree.create_element(
        w::COMMENT,
        vec![
            (w::ID.to_string(), id.to_string()),
            (w::AUTHOR.to_string(), escape_attr(author)),
            (w::DATE.to_string(), escape_attr(date)),
        ],
    );
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        lines.push("");
    }
    for line in lines {
        let p = tree.create_element(w::P, Vec::new());
        let r = text_run(tree, line);
        tree.append_child(p, r);
        tree.append_child(comment, p);
    }
    tree.append_child(root, comment);
    Ok(comment)
}

/// Detaches the `w:comment` with `id`. False when there is none.
pub fn remove_comment(tree: &mut XmlTree, id: u32) -> bool {
    let hits: Vec<NodeId> = comment_nodes(tree)
        .into_iter()
        .filter(|&c| comment_id_of(tree, c) == Some(id))
        .collect();
    for &c in &hits {
        tree.detach(c);
    }
    !hits.is_empty()
}

/// Brackets the content of paragraph `p` with the anchor triad for `id`.
pub fn insert_anchor(doc: &mut XmlTree, p: NodeId, id: u32) {
    let id_attr = || vec![(w::ID.to_string(), id.to_string())];

    let start = doc.create_element(w::COMMENT_RANGE_START, id_attr());
    let at = doc
        .children(p)
        .iter()
        .position(|&c| doc.is_element(c) && !doc.is_named(c, w::PPR))
        .unwrap_or_else(|| content_start(doc, p));
    doc.insert_child(p, at, start);

    let end = doc.create_element(w::COMMENT_RANGE_END, id_attr());
    doc.append_child(p, end);

    let run = doc.create_element(w::R, Vec::new());
    let reference = doc.create_element(w::COMMENT_REFERENCE, id_attr());
    doc.append_child(run, reference);
    doc.append_child(p, run);
}

/// Removes every anchor element for `id`, then any run left holding nothing but
/// run properties. Returns the number of anchor elements removed.
pub fn remove_anchors(doc: &mut XmlTree, id: u32) -> usize {
    let anchors: Vec<NodeId> = doc
        .descendants(crate::docx::tree::DOCUMENT)
        .into_iter()
        .filter(|&n| is_anchor(doc, n) && comment_id_of(doc, n) == Some(id))
        .collect();
    for &a in &anchors {
        let parent = doc.parent(a);
        doc.detach(a);
        if let Some(run) = parent.filter(|&r| doc.is_named(r, w::R)) {
            let empty = doc
                .element_children(run)
                .all(|c| doc.is_named(c, w::RPR));
            if empty {
                doc.detach(run);
            }
        }
    }
    anchors.len()
}

/// Each id must be present in both parts or in neither. A present comment has exactly
/// one range start, one range end and one reference; an absent one has none.
pub fn check_symmetry(comments: Option<&XmlTree>, doc: &XmlTree, ids: &[u32]) -> DocxResult<()> {
    let in_part = comments.map(comment_ids).unwrap_or_default();
    let all = doc.descendants(crate::docx::tree::DOCUMENT);
    for &id in ids {
        let count = |name: &str| {
            all.iter()
                .filter(|&&n| doc.is_named(n, name) && comment_id_of(doc, n) == Some(id))
                .count()
        };
        let expected = usize::from(in_part.contains(&id));
        let ok = [w::COMMENT_RANGE_START, w::COMMENT_RANGE_END, w::COMMENT_REFERENCE]
            .into_iter()
            .all(|name| count(name) == expected);
        if !ok {
            return Err(DocxError::CommentAnchorMismatch(id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::{
        anchor_ids, append_comment, check_symmetry, format_comment_date, insert_anchor,
        new_comments_tree, next_comment_id, read_comments, remove_anchors, remove_comment,
    };
    use crate::docx::fixtures::FixtureDocx;
    use crate::docx::numbering::{comment_paragraphs, locate};
    use crate::docx::tree::XmlTree;
    use crate::error::DocxError;

    #[test]
    fn dates_are_utc_seconds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).single().expect("date");
        assert_eq!(format_comment_date(at), "2024-03-09T14:05:07Z");
    }

    #[test]
    fn appended_comment_reads_back_line_by_line() {
        let mut tree = new_comments_tree();
        append_comment(&mut tree, 3, "Ann & Co", "2024-01-01T00:00:00Z", "one\ntwo").expect("append");
        let bytes = tree.to_bytes().expect("bytes");
        let back = XmlTree::parse("word/comments.xml", &bytes).expect("reparse");
        let entries = read_comments(&back);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 3);
        assert_eq!(entries[0].author, "Ann & Co");
        assert_eq!(entries[0].text, "one\ntwo");
    }

    #[test]
    fn next_id_considers_both_parts_and_floor() {
        let f = FixtureDocx::new(&["A", "B"]).with_comment(4, 1, "a", "x");
        let doc = f.document_tree();
        let comments = f.comments_tree();
        assert_eq!(next_comment_id(Some(&comments), &doc, 0), 5);
        assert_eq!(next_comment_id(Some(&comments), &doc, 9), 10);
        let bare = FixtureDocx::new(&["A"]).document_tree();
        assert_eq!(next_comment_id(None, &bare, 0), 1);
    }

    #[test]
    fn anchor_triad_goes_around_paragraph_content() {
        let mut doc = FixtureDocx::new(&["A", "B"]).document_tree();
        let p = locate(&doc, 2).expect("p2");
        insert_anchor(&mut doc, p, 7);
        let names: Vec<_> = doc
            .element_children(p)
            .map(|c| doc.name_of(c).unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["w:pPr", "w:commentRangeStart", "w:r", "w:commentRangeEnd", "w:r"]
        );
        assert_eq!(comment_paragraphs(&doc).expect("anchors").get(&7), Some(&2));
    }

    #[test]
    fn remove_anchors_drops_empty_reference_runs() {
        let f = FixtureDocx::new(&["A", "B"]).with_comment(2, 0, "a", "x");
        let mut doc = f.document_tree();
        let mut comments = f.comments_tree();
        check_symmetry(Some(&comments), &doc, &[2]).expect("symmetric");

        assert!(remove_comment(&mut comments, 2));
        assert_matches!(
            check_symmetry(Some(&comments), &doc, &[2]),
            Err(DocxError::CommentAnchorMismatch(2))
        );
        assert_eq!(remove_anchors(&mut doc, 2), 3);
        assert!(anchor_ids(&doc).is_empty());
        check_symmetry(Some(&comments), &doc, &[2]).expect("symmetric again");

        let p = locate(&doc, 1).expect("p1");
        assert_eq!(doc.children_named(p, "w:r").count(), 1);
        assert!(!remove_comment(&mut comments, 2));
    }

    #[test]
    fn duplicated_reference_breaks_symmetry() {
        let f = FixtureDocx::new(&["A", "B"]).with_comment(2, 1, "a", "x");
        let mut doc = f.document_tree();
        let comments = f.comments_tree();
        check_symmetry(Some(&comments), &doc, &[2]).expect("symmetric");

        let p = locate(&doc, 1).expect("p1");
        let run = doc.create_element("w:r", Vec::new());
        let reference = doc.create_element("w:commentReference", vec![("w:id".to_string(), "2".to_string())]);
        doc.append_child(run, reference);
        doc.append_child(p, run);
        assert_matches!(
            check_symmetry(Some(&comments), &doc, &[2]),
            Err(DocxError::CommentAnchorMismatch(2))
        );

        assert_eq!(remove_anchors(&mut doc, 2), 4);
        check_symmetry(None, &doc, &[2]).expect("gone from both parts");
    }
}
