//! Relationship and content-type registrations.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::docx::package::{CONTENT_TYPES_PART, DOCUMENT_RELS_PART};
use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::xml::{escape_attr, unescape_attr};
use crate::error::{DocxError, DocxResult};

pub const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

pub const COMMENTS_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments";
pub const COMMENTS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml";
pub const COMMENTS_TARGET: &str = "comments.xml";
pub const COMMENTS_PART_NAME: &str = "/word/comments.xml";

const DOCUMENT_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";

static RID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^rId(\d+)$").expect("rId regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
}

pub fn new_rels_tree() -> XmlTree {
    XmlTree::with_root(
        DOCUMENT_RELS_PART,
        "Relationships",
        vec![("xmlns".to_string(), RELS_NS.to_string())],
    )
}

fn root_of(tree: &XmlTree) -> DocxResult<NodeId> {
    tree.root()
        .ok_or_else(|| DocxError::xml(&tree.name, "no root element"))
}

fn value(tree: &XmlTree, id: NodeId, key: &str) -> String {
    tree.attr(id, key)
        .map(|v| unescape_attr(v).into_owned())
        .unwrap_or_default()
}

pub fn relationships(tree: &XmlTree) -> DocxResult<Vec<Relationship>> {
    let root = root_of(tree)?;
    Ok(tree
        .children_named(root, "Relationship")
        .map(|r| Relationship {
            id: value(tree, r, "Id"),
            rel_type: value(tree, r, "Type"),
            target: value(tree, r, "Target"),
        })
        .collect())
}

/// Relationships whose type names an image, in part order.
pub fn image_relationships(tree: &XmlTree) -> DocxResult<Vec<Relationship>> {
    Ok(relationships(tree)?
        .into_iter()
        .filter(|r| r.rel_type.to_ascii_lowercase().contains("image"))
        .collect())
}

/// `rIdN` with N one past the highest numeric id in use.
pub fn next_rid(tree: &XmlTree) -> DocxResult<String> {
    let max = relationships(tree)?
        .iter()
        .filter_map(|r| RID_RE.captures(&r.id))
        .filter_map(|c| c[1].parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Ok(format!("rId{}", max + 1))
}

/// Returns the id of the relationship targeting `target`, adding one when absent.
/// The flag is true when the tree changed.
pub fn ensure_relationship(
    tree: &mut XmlTree,
    rel_type: &str,
    target: &str,
) -> DocxResult<(String, bool)> {
    if let Some(existing) = relationships(tree)?
        .into_iter()
        .find(|r| r.target == target || (r.rel_type == rel_type && r.target.ends_with(target)))
    {
        return Ok((existing.id, false));
    }
    let id = next_rid(tree)?;
    let root = root_of(tree)?;
    let rel = tree.create_element(
        "Relationship",
        vec![
            ("Id".to_string(), escape_attr(&id)),
            ("Type".to_string(), escape_attr(rel_type)),
            ("Target".to_string(), escape_attr(target)),
        ],
    );
    tree.append_child(root, rel);
    Ok((id, true))
}

/// Minimal `[Content_Types].xml` for a package that lacks one.
pub fn new_content_types_tree() -> XmlTree {
    let mut tree = XmlTree::with_root(
        CONTENT_TYPES_PART,
        "Types",
        vec![("xmlns".to_string(), CONTENT_TYPES_NS.to_string())],
    );
    if let Some(root) = tree.root() {
        for (ext, ct) in [
            ("rels", "application/vnd.openxmlformats-package.relationships+xml"),
            ("xml", "application/xml"),
        ] {
            let d = tree.create_element(
                "Default",
                vec![
                    ("Extension".to_string(), ext.to_string()),
                    ("ContentType".to_string(), ct.to_string()),
                ],
            );
            tree.append_child(root, d);
        }
        let o = override_element(&mut tree, "/word/document.xml", DOCUMENT_CONTENT_TYPE);
        tree.append_child(root, o);
    }
    tree
}

fn override_element(tree: &mut XmlTree, part_name: &str, content_type: &str) -> NodeId {
    tree.create_element(
        "Override",
        vec![
            ("PartName".to_string(), escape_attr(part_name)),
            ("ContentType".to_string(), escape_attr(content_type)),
        ],
    )
}

/// Adds an `Override` for `part_name` unless one exists. True when the tree changed.
pub fn ensure_override(tree: &mut XmlTree, part_name: &str, content_type: &str) -> DocxResult<bool> {
    let root = root_of(tree)?;
    let present = tree
        .children_named(root, "Override")
        .any(|o| value(tree, o, "PartName") == part_name);
    if present {
        return Ok(false);
    }
    let o = override_element(tree, part_name, content_type);
    tree.append_child(root, o);
    Ok(true)
}

pub fn has_override(tree: &XmlTree, part_name: &str) -> bool {
    tree.root()
        .map(|root| {
            tree.children_named(root, "Override")
                .any(|o| value(tree, o, "PartName") == part_name)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{
        ensure_override, ensure_relationship, has_override, image_relationships,
        new_content_types_tree, new_rels_tree, next_rid, COMMENTS_CONTENT_TYPE,
        COMMENTS_PART_NAME, COMMENTS_REL_TYPE,
    };
    use crate::docx::tree::XmlTree;

    const RELS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/><Relationship Id="rIdImg" Type="x/image" Target="media/a.gif"/></Relationships>"#;

    #[test]
    fn next_rid_skips_non_numeric_ids() {
        let tree = XmlTree::parse("word/_rels/document.xml.rels", RELS).expect("parse");
        assert_eq!(next_rid(&tree).expect("rid"), "rId8");
        assert_eq!(next_rid(&new_rels_tree()).expect("rid"), "rId1");
    }

    #[test]
    fn comments_relationship_is_added_once() {
        let mut tree = XmlTree::parse("word/_rels/document.xml.rels", RELS).expect("parse");
        let (id, added) = ensure_relationship(&mut tree, COMMENTS_REL_TYPE, "comments.xml").expect("add");
        assert_eq!((id.as_str(), added), ("rId8", true));
        let (again, added) =
            ensure_relationship(&mut tree, COMMENTS_REL_TYPE, "comments.xml").expect("again");
        assert_eq!((again.as_str(), added), ("rId8", false));
    }

    #[test]
    fn image_relationships_match_on_type() {
        let tree = XmlTree::parse("word/_rels/document.xml.rels", RELS).expect("parse");
        let ids: Vec<_> = image_relationships(&tree)
            .expect("images")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["rId7", "rIdImg"]);
    }

    #[test]
    fn override_is_idempotent_on_minimal_content_types() {
        let mut tree = new_content_types_tree();
        assert!(has_override(&tree, "/word/document.xml"));
        assert!(!has_override(&tree, COMMENTS_PART_NAME));
        assert!(ensure_override(&mut tree, COMMENTS_PART_NAME, COMMENTS_CONTENT_TYPE).expect("add"));
        assert!(!ensure_override(&mut tree, COMMENTS_PART_NAME, COMMENTS_CONTENT_TYPE).expect("again"));
        let bytes = tree.to_bytes().expect("bytes");
        assert!(String::from_utf8(bytes)
            .expect("utf8")
            .contains(r#"<Override PartName="/word/comments.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml"/>"#));
    }
}
