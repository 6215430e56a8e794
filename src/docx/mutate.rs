use std::collections::BTreeSet;

use crate::docx::comments::is_anchor;
use crate::docx::numbering::{self, MutationReport, Snapshot};
use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::w;
use crate::error::{DocxError, DocxResult};

/// Replaces the text of paragraph `n`, keeping its runs' formatting.
pub fn replace_text(doc: &mut XmlTree, n: usize, new_text: &str) -> DocxResult<MutationReport> {
    if new_text.trim().is_empty() {
        return Err(DocxError::BlankText);
    }
    let p = numbering::locate(doc, n)?;
    let before = Snapshot::capture(doc)?;

    for t in doc.descendants_named(p, w::T) {
        doc.detach(t);
    }
    let run = match text_run(doc, p) {
        Some(r) => r,
        None => {
            let r = doc.create_element(w::R, Vec::new());
            let at = content_start(doc, p);
            doc.insert_child(p, at, r);
            r
        }
    };
    let t = text_element(doc, new_text);
    doc.append_child(run, t);

    let mut report = Snapshot::diff(&before, &Snapshot::capture(doc)?);
    report.paragraph = Some(n);
    Ok(report)
}

/// Inserts a new single-run paragraph.
///
/// `position = Some(k)` puts it right after the (k-1)-th numbered paragraph (at the top of
/// the body for k = 1); a k past the end, `Some(0)` and `None` append.
pub fn insert_paragraph(
    doc: &mut XmlTree,
    text: &str,
    position: Option<usize>,
) -> DocxResult<MutationReport> {
    let body = numbering::body(doc)?;
    let before = Snapshot::capture(doc)?;
    let numbered = numbering::enumerate(doc)?;

    let text = if text.trim().is_empty() { " " } else { text };
    let p = doc.create_element(w::P, Vec::new());
    let r = doc.create_element(w::R, Vec::new());
    let t = text_element(doc, text);
    doc.append_child(r, t);
    doc.append_child(p, r);

    let index = match position.filter(|&k| k > 0) {
        Some(1) => Some(0),
        Some(k) => numbered
            .get(k - 2)
            .and_then(|prev| doc.index_in_parent(prev.node))
            .map(|i| i + 1),
        None => None,
    };
    let index = index.unwrap_or_else(|| append_index(doc, body));
    doc.insert_child(body, index, p);

    let after = Snapshot::capture(doc)?;
    let mut report = Snapshot::diff(&before, &after);
    report.paragraph = after.number_of(p);
    Ok(report)
}

/// Removes paragraph `n`. Every comment with any anchor element inside it, including a
/// range that only starts or only ends there, is reported as orphaned; the caller removes
/// those comments and their remaining anchors.
pub fn delete_paragraph(doc: &mut XmlTree, n: usize) -> DocxResult<MutationReport> {
    let p = numbering::locate(doc, n)?;
    if numbering::count(doc)? == 1 {
        return Err(DocxError::LastParagraph);
    }
    let cut: BTreeSet<u32> = doc
        .descendants(p)
        .into_iter()
        .filter(|&a| is_anchor(doc, a))
        .filter_map(|a| numbering::comment_id_of(doc, a))
        .collect();
    let before = Snapshot::capture(doc)?;
    doc.detach(p);
    let mut report = Snapshot::diff(&before, &Snapshot::capture(doc)?);
    report.paragraph = Some(n);
    report.moved_comments.retain(|(id, _, _)| !cut.contains(id));
    report.orphaned_comments.extend(cut);
    report.orphaned_comments.sort_unstable();
    report.orphaned_comments.dedup();
    Ok(report)
}

fn text_element(doc: &mut XmlTree, text: &str) -> NodeId {
    let mut attrs = Vec::new();
    if text.trim() != text {
        attrs.push(("xml:space".to_string(), "preserve".to_string()));
    }
    let t = doc.create_element(w::T, attrs);
    let txt = doc.create_text(text);
    doc.append_child(t, txt);
    t
}

/// First run of `p` that can carry text: not a comment reference, not a drawing holder.
fn text_run(doc: &XmlTree, p: NodeId) -> Option<NodeId> {
    doc.descendants_named(p, w::R).into_iter().find(|&r| {
        doc.descendants(r).into_iter().all(|n| {
            !(doc.is_named(n, w::COMMENT_REFERENCE)
                || doc.is_named(n, w::DRAWING)
                || doc.is_named(n, w::PICT))
        })
    })
}

/// Child index just past `w:pPr` and any leading comment range starts.
pub(crate) fn content_start(doc: &XmlTree, p: NodeId) -> usize {
    doc.children(p)
        .iter()
        .position(|&c| {
            doc.is_element(c)
                && !doc.is_named(c, w::PPR)
                && !doc.is_named(c, w::COMMENT_RANGE_START)
        })
        .unwrap_or(doc.children(p).len())
}

/// End of the body, before a trailing `w:sectPr`.
fn append_index(doc: &XmlTree, body: NodeId) -> usize {
    let children = doc.children(body);
    match doc.element_children(body).last() {
        Some(last) if doc.is_named(last, w::SECT_PR) => {
            children.iter().position(|&c| c == last).unwrap_or(children.len())
        }
        _ => children.len(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::{delete_paragraph, insert_paragraph, replace_text};
    use crate::docx::fixtures::{FixtureDocx, IMAGE_PARAGRAPH};
    use crate::docx::numbering::{enumerate, locate};
    use crate::docx::tree::XmlTree;
    use crate::error::DocxError;

    fn document(f: FixtureDocx) -> XmlTree {
        f.document_tree()
    }

    fn texts(tree: &XmlTree) -> Vec<String> {
        enumerate(tree)
            .expect("enumerate")
            .into_iter()
            .map(|p| tree.text_of(p.node, "w:t"))
            .collect()
    }

    #[test]
    fn replace_keeps_run_properties_and_preserves_spaces() {
        let mut tree = document(FixtureDocx::new(&["Hello", "World"]));
        let report = replace_text(&mut tree, 2, " Hi there ").expect("replace");
        assert_eq!(report.paragraph, Some(2));
        assert!(report.is_noop());
        assert_eq!(texts(&tree), vec!["Hello", " Hi there "]);

        let p = locate(&tree, 2).expect("p2");
        let t = tree.find(p, "w:t").expect("w:t");
        assert_eq!(tree.attr(t, "xml:space"), Some("preserve"));
        let r = tree.parent(t).expect("run");
        assert!(tree.child_named(r, "w:rPr").is_some());
    }

    #[test]
    fn replace_rejects_blank_text() {
        let mut tree = document(FixtureDocx::new(&["Hello"]));
        assert_matches!(replace_text(&mut tree, 1, "  "), Err(DocxError::BlankText));
        assert_matches!(replace_text(&mut tree, 2, "x"), Err(DocxError::ParagraphNotFound(2)));
    }

    #[test]
    fn replace_on_image_paragraph_adds_a_text_run() {
        let mut tree = document(FixtureDocx::new(&["A", IMAGE_PARAGRAPH]));
        replace_text(&mut tree, 2, "caption").expect("replace");
        let p = locate(&tree, 2).expect("p2");
        assert_eq!(tree.text_of(p, "w:t"), "caption");
        assert!(tree.find(p, "w:drawing").is_some());
    }

    #[test]
    fn insert_at_position_shifts_later_paragraphs() {
        let mut tree = document(FixtureDocx::new(&["A", "", "B", "C"]));
        let report = insert_paragraph(&mut tree, "New", Some(2)).expect("insert");
        assert_eq!(report.paragraph, Some(2));
        assert_eq!(report.renumbered, vec![(2, 3), (3, 4)]);
        assert_eq!(texts(&tree), vec!["A", "New", "B", "C"]);
    }

    #[test]
    fn insert_first_and_append_before_sect_pr() {
        let mut tree = document(FixtureDocx::new(&["A"]));
        insert_paragraph(&mut tree, "Top", Some(1)).expect("top");
        let report = insert_paragraph(&mut tree, "End", None).expect("end");
        assert_eq!(report.paragraph, Some(3));
        insert_paragraph(&mut tree, "Far", Some(99)).expect("far");
        assert_eq!(texts(&tree), vec!["Top", "A", "End", "Far"]);

        let body = tree.find(tree.root().expect("root"), "w:body").expect("body");
        let last = tree.element_children(body).last().expect("last");
        assert_eq!(tree.name_of(last), Some("w:sectPr"));
    }

    #[test]
    fn blank_insert_is_unnumbered() {
        let mut tree = document(FixtureDocx::new(&["A", "B"]));
        let report = insert_paragraph(&mut tree, "", Some(1)).expect("insert");
        assert_eq!(report.paragraph, None);
        assert!(report.renumbered.is_empty());
        assert_eq!(texts(&tree), vec!["A", "B"]);
    }

    #[test]
    fn insert_then_delete_restores_numbering() {
        let mut tree = document(FixtureDocx::new(&["A", "B", "C"]));
        let before = texts(&tree);
        let ins = insert_paragraph(&mut tree, "X", Some(2)).expect("insert");
        let del = delete_paragraph(&mut tree, ins.paragraph.expect("numbered")).expect("delete");
        assert_eq!(del.removed_paragraphs, vec![2]);
        assert_eq!(del.renumbered, vec![(3, 2), (4, 3)]);
        assert_eq!(texts(&tree), before);
    }

    #[test]
    fn delete_guards_last_paragraph_and_reports_comments() {
        let mut tree = document(
            FixtureDocx::new(&["A", "B", "C"])
                .with_comment(1, 0, "x", "on A")
                .with_comment(2, 2, "y", "on C"),
        );
        let report = delete_paragraph(&mut tree, 1).expect("delete");
        assert_eq!(report.orphaned_comments, vec![1]);
        assert_eq!(report.moved_comments, vec![(2, 3, 2)]);

        let mut spanning = document(
            FixtureDocx::new(&["A", "B", "C"]).with_spanning_comment(4, 0, 1, "x", "A to B"),
        );
        let report = delete_paragraph(&mut spanning, 2).expect("delete end");
        assert_eq!(report.orphaned_comments, vec![4]);
        assert!(report.moved_comments.is_empty());

        let mut single = document(FixtureDocx::new(&["", "Only"]));
        assert_matches!(delete_paragraph(&mut single, 1), Err(DocxError::LastParagraph));
        assert_matches!(delete_paragraph(&mut single, 2), Err(DocxError::ParagraphNotFound(2)));
    }
}
