//! Read-only HTML projection of a body paragraph.

use std::collections::HashMap;

use quick_xml::escape::escape;

use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::w;
use crate::docx::xml::unescape_attr;

/// Plain-text stand-in for a drawing.
pub const IMAGE_MARKER: &str = "[IMAGE]";

/// How an embedded image is shown, keyed by relationship id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub src: String,
    pub alt: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedParagraph {
    pub text: String,
    pub html: String,
    pub has_images: bool,
    pub image_rel_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Block {
    Heading(u8),
    Para(Option<&'static str>),
}

fn block_of(tree: &XmlTree, p: NodeId) -> Block {
    let Some(ppr) = tree.child_named(p, w::PPR) else {
        return Block::Para(None);
    };
    let val = |name: &str| {
        tree.child_named(ppr, name)
            .and_then(|n| tree.attr(n, w::VAL))
            .map(|v| unescape_attr(v).into_owned())
    };
    if let Some(style) = val(w::P_STYLE) {
        if style.to_ascii_lowercase().contains("heading") {
            let level = style
                .chars()
                .last()
                .and_then(|c| c.to_digit(10))
                .filter(|&d| d > 0)
                .unwrap_or(1);
            return Block::Heading(level.min(6) as u8);
        }
        if style == "Title" || style == "Subtitle" {
            return Block::Heading(1);
        }
    }
    let align = match val(w::JC).as_deref() {
        Some("center") => Some("center"),
        Some("right") => Some("right"),
        Some("both") => Some("justify"),
        _ => None,
    };
    Block::Para(align)
}

/// A toggle property such as `w:b` is on unless its value says otherwise.
fn toggled(tree: &XmlTree, rpr: Option<NodeId>, name: &str) -> bool {
    let Some(node) = rpr.and_then(|r| tree.child_named(r, name)) else {
        return false;
    };
    !matches!(tree.attr(node, w::VAL), Some("0") | Some("false") | Some("none"))
}

fn format_run_text(tree: &XmlTree, run: NodeId, text: &str) -> String {
    let rpr = tree.child_named(run, w::RPR);
    let mut out = escape(text).into_owned();
    if toggled(tree, rpr, w::B) {
        out = format!("<strong>{out}</strong>");
    }
    if toggled(tree, rpr, w::I) {
        out = format!("<em>{out}</em>");
    }
    if toggled(tree, rpr, w::U) {
        out = format!("<u>{out}</u>");
    }
    out
}

fn blip_rel_id(tree: &XmlTree, drawing: NodeId) -> Option<String> {
    let blip = tree.find(drawing, "a:blip")?;
    tree.attr(blip, "r:embed")
        .map(|v| unescape_attr(v).into_owned())
}

/// Text (with a marker per drawing), HTML and image references of paragraph `p`.
pub fn render_paragraph(
    tree: &XmlTree,
    p: NodeId,
    images: &HashMap<String, ImageRef>,
) -> RenderedParagraph {
    let mut out = RenderedParagraph::default();
    let mut inner = String::new();

    for run in tree.descendants_named(p, w::R) {
        for t in tree.descendants_named(run, w::T) {
            let text = tree.text_of_node(t);
            if text.is_empty() {
                continue;
            }
            out.text.push_str(&text);
            inner.push_str(&format_run_text(tree, run, &text));
        }
        for d in tree.descendants_named(run, w::DRAWING) {
            out.text.push_str(IMAGE_MARKER);
            out.has_images = true;
            let Some(rel_id) = blip_rel_id(tree, d) else {
                continue;
            };
            if let Some(img) = images.get(&rel_id) {
                inner.push_str(&format!(
                    r#"<img src="{}" alt="{}" class="document-image" />"#,
                    escape(img.src.as_str()),
                    escape(img.alt.as_str())
                ));
            }
            out.image_rel_ids.push(rel_id);
        }
    }

    if !inner.trim().is_empty() {
        out.html = match block_of(tree, p) {
            Block::Heading(n) => format!("<h{n}>{inner}</h{n}>"),
            Block::Para(Some(align)) => {
                format!(r#"<p style="text-align: {align};">{inner}</p>"#)
            }
            Block::Para(None) => format!("<p>{inner}</p>"),
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::{render_paragraph, ImageRef};
    use crate::docx::tree::XmlTree;

    fn first_paragraph(body: &str) -> (XmlTree, usize) {
        let xml = format!(
            r#"<w:document xmlns:w="urn:w" xmlns:a="urn:a" xmlns:r="urn:r"><w:body>{body}</w:body></w:document>"#
        );
        let tree = XmlTree::parse("word/document.xml", xml.as_bytes()).expect("parse");
        let p = tree.find(tree.root().expect("root"), "w:p").expect("p");
        (tree, p)
    }

    #[test]
    fn heading_style_maps_to_heading_level() {
        let (tree, p) = first_paragraph(
            r#"<w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>Scope</w:t></w:r></w:p>"#,
        );
        let r = render_paragraph(&tree, p, &HashMap::new());
        assert_eq!(r.html, "<h2>Scope</h2>");
        assert_eq!(r.text, "Scope");
    }

    #[test]
    fn run_formatting_alignment_and_escaping() {
        let (tree, p) = first_paragraph(
            r#"<w:p><w:pPr><w:jc w:val="both"/></w:pPr><w:r><w:rPr><w:b/><w:i/></w:rPr><w:t>a&lt;b</w:t></w:r><w:r><w:rPr><w:u w:val="single"/><w:b w:val="0"/></w:rPr><w:t xml:space="preserve"> c</w:t></w:r></w:p>"#,
        );
        let r = render_paragraph(&tree, p, &HashMap::new());
        assert_eq!(
            r.html,
            r#"<p style="text-align: justify;"><em><strong>a&lt;b</strong></em><u> c</u></p>"#
        );
        assert_eq!(r.text, "a<b c");
    }

    #[test]
    fn drawings_become_markers_and_img_tags() {
        let (tree, p) = first_paragraph(
            r#"<w:p><w:r><w:t>See</w:t></w:r><w:r><w:drawing><a:graphic><a:blip r:embed="rId5"/></a:graphic></w:drawing></w:r></w:p>"#,
        );
        let images: HashMap<_, _> = [(
            "rId5".to_string(),
            ImageRef {
                src: "ab12cd34_image1.png".to_string(),
                alt: "image1.png".to_string(),
            },
        )]
        .into_iter()
        .collect();
        let r = render_paragraph(&tree, p, &images);
        assert_eq!(r.text, "See[IMAGE]");
        assert!(r.has_images);
        assert_eq!(r.image_rel_ids, vec!["rId5"]);
        assert_eq!(
            r.html,
            r#"<p>See<img src="ab12cd34_image1.png" alt="image1.png" class="document-image" /></p>"#
        );
    }

    #[test]
    fn blank_paragraph_has_no_html() {
        let (tree, p) = first_paragraph(r#"<w:p><w:r><w:t xml:space="preserve">  </w:t></w:r></w:p>"#);
        let r = render_paragraph(&tree, p, &HashMap::new());
        assert_eq!(r.html, "");
        assert_eq!(r.text, "  ");
    }
}
