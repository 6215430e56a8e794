//! Full read of an uploaded document: numbered paragraphs with their HTML projection,
//! and comments resolved to the paragraph they are anchored in.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::Serialize;

use crate::docx::comments::read_comments;
use crate::docx::html::{render_paragraph, ImageRef};
use crate::docx::images::{image_refs, package_images, target_part, ExtractedImage};
use crate::docx::numbering::{comment_paragraphs, enumerate};
use crate::docx::package::{DocxPackage, COMMENTS_PART, DOCUMENT_PART};
use crate::docx::tree::XmlTree;
use crate::error::{DocxError, DocxResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParsedParagraph {
    pub number: usize,
    pub text: String,
    pub html: String,
    pub has_images: bool,
    pub image_rel_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParsedComment {
    pub id: u32,
    pub author: String,
    pub date: Option<String>,
    pub text: String,
    pub paragraph: usize,
    /// False when no numbered paragraph holds the anchor and `paragraph` fell back to 1.
    pub anchor_resolved: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParsedDocument {
    pub paragraphs: Vec<ParsedParagraph>,
    pub comments: Vec<ParsedComment>,
}

pub fn parse_trees(
    doc: &XmlTree,
    comments: Option<&XmlTree>,
    images: &HashMap<String, ImageRef>,
) -> DocxResult<ParsedDocument> {
    let paragraphs = enumerate(doc)?
        .into_iter()
        .map(|np| {
            let r = render_paragraph(doc, np.node, images);
            ParsedParagraph {
                number: np.number,
                text: r.text,
                html: r.html,
                has_images: r.has_images,
                image_rel_ids: r.image_rel_ids,
            }
        })
        .collect();

    let anchors = comment_paragraphs(doc)?;
    let comments = comments
        .map(read_comments)
        .unwrap_or_default()
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .map(|c| {
            let resolved = anchors.get(&c.id).copied();
            if resolved.is_none() {
                debug!("comment {} has no anchor in a numbered paragraph", c.id);
            }
            ParsedComment {
                id: c.id,
                author: c.author,
                date: c.date,
                text: c.text,
                paragraph: resolved.unwrap_or(1),
                anchor_resolved: resolved.is_some(),
            }
        })
        .collect();

    Ok(ParsedDocument {
        paragraphs,
        comments,
    })
}

/// Parses an in-memory package. `images` maps relationship ids to already extracted
/// files; without it, image tags point at the part inside the package.
pub fn parse_package(pkg: &DocxPackage, images: Option<&[ExtractedImage]>) -> DocxResult<ParsedDocument> {
    let doc = pkg
        .part_tree(DOCUMENT_PART)?
        .ok_or_else(|| DocxError::PartNotFound(DOCUMENT_PART.to_string()))?;
    let comments = pkg.part_tree(COMMENTS_PART)?;
    let refs = match images {
        Some(list) => image_refs(list),
        None => package_images(pkg)?
            .into_iter()
            .map(|rel| {
                let part = target_part(&rel.target);
                let alt = part.rsplit('/').next().unwrap_or(part.as_str()).to_string();
                (rel.id, ImageRef { src: part, alt })
            })
            .collect(),
    };
    parse_trees(&doc, comments.as_ref(), &refs)
}

pub fn parse_document(path: &Path) -> DocxResult<ParsedDocument> {
    let pkg = DocxPackage::read(path)?;
    parse_package(&pkg, None)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::{parse_document, parse_trees};
    use crate::docx::fixtures::{FixtureDocx, IMAGE_PARAGRAPH};

    #[test]
    fn paragraphs_are_numbered_and_projected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d.docx");
        FixtureDocx::new(&["Intro", "", IMAGE_PARAGRAPH, "End"])
            .with_media()
            .write(&path);

        let parsed = parse_document(&path).expect("parse");
        let numbers: Vec<_> = parsed.paragraphs.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(parsed.paragraphs[0].html, "<p><strong>Intro</strong></p>");
        let img = &parsed.paragraphs[1];
        assert!(img.has_images);
        assert_eq!(img.text, "[IMAGE]");
        assert!(img.html.contains(r#"src="word/media/image1.png""#));
    }

    #[test]
    fn comments_resolve_or_fall_back_to_first_paragraph() {
        let f = FixtureDocx::new(&["A", "B", ""])
            .with_comment(1, 1, "ann", "on B")
            .with_comment(2, 2, "bob", "on blank")
            .with_comment(3, 0, "cy", "  ");
        let doc = f.document_tree();
        let comments = f.comments_tree();
        let parsed = parse_trees(&doc, Some(&comments), &HashMap::new()).expect("parse");

        let got: Vec<_> = parsed
            .comments
            .iter()
            .map(|c| (c.id, c.paragraph, c.anchor_resolved))
            .collect();
        assert_eq!(got, vec![(1, 2, true), (2, 1, false)]);
    }
}
