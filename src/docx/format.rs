use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use walkdir::WalkDir;

use crate::docx::tree::{NodeId, NodeKind, XmlTree, DOCUMENT};
use crate::docx::xml::XmlWriter;
use crate::error::{DocxError, DocxResult, IoContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatOutcome {
    Pretty,
    /// The pretty form did not survive re-parsing; the unformatted form was written.
    Compact,
}

/// Writes `tree` to `path` in Word's preferred shape and verifies it parses back.
pub fn write_part(tree: &XmlTree, path: &Path) -> DocxResult<FormatOutcome> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).at(dir)?;
    }
    let expected = tree.signature();

    let pretty = pretty_bytes(tree)?;
    fs::write(path, &pretty).at(path)?;
    match verify_written(path, &tree.name, &expected) {
        Ok(()) => return Ok(FormatOutcome::Pretty),
        Err(reason) => {
            error!(
                "formatted {} did not round-trip ({reason}); writing unformatted",
                path.display()
            );
        }
    }

    let compact = compact_bytes(tree)?;
    fs::write(path, &compact).at(path)?;
    verify_written(path, &tree.name, &expected).map_err(|reason| DocxError::MalformedOutput {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(FormatOutcome::Compact)
}

/// Re-indents an existing part. A part that does not parse is left untouched.
pub fn format_in_place(path: &Path) -> DocxResult<bool> {
    let bytes = fs::read(path).at(path)?;
    let name = path.to_string_lossy().into_owned();
    let tree = match XmlTree::parse(&name, &bytes) {
        Ok(t) => t,
        Err(e) => {
            warn!("leaving {} unformatted: {e}", path.display());
            return Ok(false);
        }
    };
    write_part(&tree, path)?;
    Ok(true)
}

/// Formats every XML part below `dir` that is not listed in `skip`.
pub fn format_package(dir: &Path, skip: &HashSet<PathBuf>) -> DocxResult<usize> {
    let mut formatted = 0usize;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| DocxError::io(dir, e.into()))?;
        if !entry.file_type().is_file() || skip.contains(entry.path()) {
            continue;
        }
        if !is_xml_part_name(&entry.path().to_string_lossy()) {
            continue;
        }
        if format_in_place(entry.path())? {
            formatted += 1;
        } else {
            debug!("kept original bytes of {}", entry.path().display());
        }
    }
    Ok(formatted)
}

pub fn is_xml_part_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".xml") || lower.ends_with(".rels")
}

fn verify_written(path: &Path, part: &str, expected: &[String]) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let reparsed = XmlTree::parse(part, &bytes).map_err(|e| e.to_string())?;
    if reparsed.signature() != expected {
        return Err("content differs after re-parse".to_string());
    }
    Ok(())
}

pub fn compact_bytes(tree: &XmlTree) -> DocxResult<Vec<u8>> {
    let mut w = XmlWriter::new(&tree.name);
    w.word_decl()?;
    tree.write_node(DOCUMENT, &mut w)?;
    Ok(w.into_bytes())
}

pub fn pretty_bytes(tree: &XmlTree) -> DocxResult<Vec<u8>> {
    let mut w = XmlWriter::new(&tree.name);
    w.word_decl()?;
    for &c in tree.children(DOCUMENT) {
        w.break_line(0);
        write_pretty(tree, c, 0, &mut w)?;
    }
    Ok(w.into_bytes())
}

fn write_pretty(tree: &XmlTree, id: NodeId, depth: usize, w: &mut XmlWriter) -> DocxResult<()> {
    let name = match tree.name_of(id) {
        Some(name) if !keeps_inline(tree, id) => name,
        _ => return tree.write_node(id, w),
    };
    w.start(name, tree.attrs(id), false)?;
    for &c in tree.children(id) {
        if is_blank_text(tree, c) {
            continue;
        }
        w.break_line(depth + 1);
        write_pretty(tree, c, depth + 1, w)?;
    }
    w.break_line(depth);
    w.end(name)
}

/// Elements whose text must not gain indentation: childless, text-only, mixed content,
/// or explicitly whitespace-preserving.
fn keeps_inline(tree: &XmlTree, id: NodeId) -> bool {
    let children = tree.children(id);
    if children.is_empty() {
        return true;
    }
    if tree.attr(id, "xml:space") == Some("preserve") {
        return true;
    }
    if tree.element_children(id).next().is_none() {
        return true;
    }
    children.iter().any(|&c| match &tree.node(c).kind {
        NodeKind::Text(t) | NodeKind::CData(t) => !t.trim().is_empty(),
        _ => false,
    })
}

fn is_blank_text(tree: &XmlTree, id: NodeId) -> bool {
    matches!(&tree.node(id).kind, NodeKind::Text(t) if t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::{format_in_place, format_package, pretty_bytes, write_part, FormatOutcome};
    use crate::docx::tree::XmlTree;

    const DOC: &[u8] = br#"<?xml version="1.0"?><w:document xmlns:w="urn:w"><w:body><w:p><w:r><w:t xml:space="preserve"> two  spaces </w:t></w:r></w:p><w:p/></w:body></w:document>"#;

    #[test]
    fn pretty_output_is_indented_and_word_declared() {
        let tree = XmlTree::parse("document.xml", DOC).expect("parse");
        let s = String::from_utf8(pretty_bytes(&tree).expect("pretty")).expect("utf8");
        let expected = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="urn:w">
  <w:body>
    <w:p>
      <w:r>
        <w:t xml:space="preserve"> two  spaces </w:t>
      </w:r>
    </w:p>
    <w:p/>
  </w:body>
</w:document>"#;
        assert_eq!(s, expected);
        assert!(!s.lines().any(|l| l.trim().is_empty()));
    }

    #[test]
    fn mixed_content_stays_inline() {
        let xml = br#"<root><a>x <b>y</b> z</a></root>"#;
        let tree = XmlTree::parse("m.xml", xml).expect("parse");
        let s = String::from_utf8(pretty_bytes(&tree).expect("pretty")).expect("utf8");
        assert!(s.contains("  <a>x <b>y</b> z</a>"));
    }

    #[test]
    fn write_part_verifies_and_reports_pretty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("word").join("document.xml");
        let tree = XmlTree::parse("word/document.xml", DOC).expect("parse");
        assert_eq!(write_part(&tree, &path).expect("write"), FormatOutcome::Pretty);
        let back = XmlTree::parse("word/document.xml", &std::fs::read(&path).expect("read"))
            .expect("reparse");
        assert_eq!(back.signature(), tree.signature());
    }

    #[test]
    fn format_in_place_skips_unparseable_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = dir.path().join("bad.xml");
        std::fs::write(&bad, b"<a><b></a>").expect("write");
        assert!(!format_in_place(&bad).expect("format"));
        assert_eq!(std::fs::read(&bad).expect("read"), b"<a><b></a>");
    }

    #[test]
    fn format_package_honours_skip_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.xml");
        let b = dir.path().join("_rels").join("b.rels");
        std::fs::create_dir_all(b.parent().expect("parent")).expect("mkdir");
        std::fs::write(&a, b"<a><x/></a>").expect("write");
        std::fs::write(&b, b"<r><y/></r>").expect("write");
        std::fs::write(dir.path().join("image.png"), b"\x89PNG").expect("write");
        let skip: HashSet<_> = [a.clone()].into_iter().collect();
        assert_eq!(format_package(dir.path(), &skip).expect("format"), 1);
        assert_eq!(std::fs::read(&a).expect("read"), b"<a><x/></a>");
        assert!(std::fs::read_to_string(&b).expect("read").contains("\n  <y/>"));
    }
}
