//! DOCX builders shared by the unit tests and the integration tests. Not part of the
//! supported API; panics on any failure.

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::docx::package::{COMMENTS_PART, DOCUMENT_PART};
use crate::docx::tree::XmlTree;

pub const MEDIA_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-a-png";
/// Paragraph text that produces a drawing-only paragraph.
pub const IMAGE_PARAGRAPH: &str = "[IMAGE]";

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

struct FixtureComment {
    id: u32,
    /// 0-based paragraph indices holding the range start and the range end plus reference.
    start: usize,
    end: usize,
    author: String,
    text: String,
}

#[derive(Default)]
pub struct FixtureDocx {
    paragraphs: Vec<String>,
    comments: Vec<FixtureComment>,
    media: bool,
}

impl FixtureDocx {
    pub fn new(paragraphs: &[&str]) -> Self {
        Self {
            paragraphs: paragraphs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self) -> Self {
        self.media = true;
        self
    }

    pub fn with_comment(self, id: u32, paragraph_index: usize, author: &str, text: &str) -> Self {
        self.with_spanning_comment(id, paragraph_index, paragraph_index, author, text)
    }

    /// Comment whose range opens in paragraph `start` and closes in paragraph `end`.
    pub fn with_spanning_comment(
        mut self,
        id: u32,
        start: usize,
        end: usize,
        author: &str,
        text: &str,
    ) -> Self {
        self.comments.push(FixtureComment {
            id,
            start,
            end,
            author: author.to_string(),
            text: text.to_string(),
        });
        self
    }

    pub fn document_tree(&self) -> XmlTree {
        XmlTree::parse(DOCUMENT_PART, self.document_xml().as_bytes()).expect("fixture document")
    }

    pub fn comments_tree(&self) -> XmlTree {
        XmlTree::parse(COMMENTS_PART, self.comments_xml().as_bytes()).expect("fixture comments")
    }

    fn document_xml(&self) -> String {
        let mut body = String::new();
        for (i, p) in self.paragraphs.iter().enumerate() {
            let starts: Vec<u32> = self
                .comments
                .iter()
                .filter(|c| c.start == i)
                .map(|c| c.id)
                .collect();
            let ends: Vec<u32> = self
                .comments
                .iter()
                .filter(|c| c.end == i)
                .map(|c| c.id)
                .collect();
            if p.is_empty() && starts.is_empty() && ends.is_empty() {
                body.push_str("<w:p/>");
                continue;
            }
            body.push_str("<w:p><w:pPr><w:jc w:val=\"left\"/></w:pPr>");
            for id in &starts {
                body.push_str(&format!("<w:commentRangeStart w:id=\"{id}\"/>"));
            }
            if p == IMAGE_PARAGRAPH {
                body.push_str(
                    "<w:r><w:drawing><wp:inline><a:graphic><a:graphicData><pic:pic><pic:blipFill>\
                     <a:blip r:embed=\"rIdImg1\"/></pic:blipFill></pic:pic></a:graphicData>\
                     </a:graphic></wp:inline></w:drawing></w:r>",
                );
            } else if !p.is_empty() {
                body.push_str(&format!(
                    "<w:r><w:rPr><w:b/></w:rPr><w:t>{}</w:t></w:r>",
                    quick_xml::escape::escape(p.as_str())
                ));
            }
            for id in &ends {
                body.push_str(&format!(
                    "<w:commentRangeEnd w:id=\"{id}\"/><w:r><w:commentReference w:id=\"{id}\"/></w:r>"
                ));
            }
            body.push_str("</w:p>");
        }
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <w:document xmlns:w=\"{W_NS}\" xmlns:r=\"{R_NS}\" \
             xmlns:wp=\"urn:wp\" xmlns:a=\"urn:a\" xmlns:pic=\"urn:pic\">\
             <w:body>{body}<w:sectPr><w:pgSz w:w=\"12240\" w:h=\"15840\"/></w:sectPr></w:body></w:document>"
        )
    }

    fn comments_xml(&self) -> String {
        let mut items = String::new();
        for FixtureComment { id, author, text, .. } in &self.comments {
            items.push_str(&format!(
                "<w:comment w:id=\"{id}\" w:author=\"{author}\" w:date=\"2024-01-01T00:00:00Z\">\
                 <w:p><w:r><w:t>{text}</w:t></w:r></w:p></w:comment>"
            ));
        }
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <w:comments xmlns:w=\"{W_NS}\">{items}</w:comments>"
        )
    }

    fn content_types_xml(&self) -> String {
        let comments = if self.comments.is_empty() {
            ""
        } else {
            "<Override PartName=\"/word/comments.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml\"/>"
        };
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Default Extension=\"png\" ContentType=\"image/png\"/>\
             <Override PartName=\"/word/document.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
             {comments}</Types>"
        )
    }

    fn document_rels_xml(&self) -> String {
        let mut rels = String::from(
            "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/>",
        );
        if self.media {
            rels.push_str("<Relationship Id=\"rIdImg1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/image\" Target=\"media/image1.png\"/>");
        }
        if !self.comments.is_empty() {
            rels.push_str("<Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments\" Target=\"comments.xml\"/>");
        }
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{rels}</Relationships>"
        )
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut entries: Vec<(&str, Vec<u8>)> = vec![
            ("[Content_Types].xml", self.content_types_xml().into_bytes()),
            (
                "_rels/.rels",
                b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"word/document.xml\"/></Relationships>".to_vec(),
            ),
            ("word/document.xml", self.document_xml().into_bytes()),
            ("word/_rels/document.xml.rels", self.document_rels_xml().into_bytes()),
            (
                "word/styles.xml",
                format!("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<w:styles xmlns:w=\"{W_NS}\"/>").into_bytes(),
            ),
        ];
        if !self.comments.is_empty() {
            entries.push(("word/comments.xml", self.comments_xml().into_bytes()));
        }
        if self.media {
            entries.push(("word/media/image1.png", MEDIA_BYTES.to_vec()));
        }

        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            let method = if name.starts_with("word/media/") {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            zout.start_file(name, SimpleFileOptions::default().compression_method(method))
                .expect("start file");
            zout.write_all(&data).expect("write entry");
        }
        zout.finish().expect("finish zip").into_inner()
    }

    pub fn write(&self, path: &Path) {
        std::fs::write(path, self.bytes()).expect("write docx");
    }
}

pub fn docx_bytes(paragraphs: &[&str], media: bool) -> Vec<u8> {
    let f = FixtureDocx::new(paragraphs);
    if media { f.with_media() } else { f }.bytes()
}

pub fn write_docx(path: &Path, paragraphs: &[&str], media: bool) {
    std::fs::write(path, docx_bytes(paragraphs, media)).expect("write docx");
}
