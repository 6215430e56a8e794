//! quick-xml edge of the crate: attribute lifting on read, and a node-level writer.

use std::borrow::Cow;

use quick_xml::escape::partial_escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::Writer;

use crate::error::{DocxError, DocxResult};

const INDENT: &[u8] = b"  ";

pub(crate) fn utf8(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

/// Attributes of a start tag with their values left escaped.
///
/// Values such as VML `o:gfxdata` carry `&#13;&#10;`; decoding them would let attribute
/// normalization turn the newlines into spaces on the next write.
pub(crate) fn raw_attrs(part: &str, tag: &BytesStart<'_>) -> DocxResult<Vec<(String, String)>> {
    tag.attributes()
        .map(|a| {
            let a = a.map_err(|e| DocxError::xml(part, e))?;
            Ok((utf8(a.key.as_ref()), utf8(a.value.as_ref())))
        })
        .collect()
}

/// Escapes a plain string for use as a raw attribute value.
pub fn escape_attr(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

/// Decodes a raw attribute value. Malformed references are returned as-is.
pub fn unescape_attr(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::unescape(raw).unwrap_or(Cow::Borrowed(raw))
}

/// Serializer for tree nodes. Attribute values go out exactly as stored.
pub(crate) struct XmlWriter {
    part: String,
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub fn new(part: &str) -> Self {
        Self {
            part: part.to_string(),
            inner: Writer::new(Vec::new()),
        }
    }

    fn emit(&mut self, ev: Event<'_>) -> DocxResult<()> {
        self.inner
            .write_event(ev)
            .map_err(|e| DocxError::xml(&self.part, e))
    }

    pub fn decl(
        &mut self,
        version: &str,
        encoding: Option<&str>,
        standalone: Option<&str>,
    ) -> DocxResult<()> {
        self.emit(Event::Decl(BytesDecl::new(version, encoding, standalone)))
    }

    /// The declaration Word itself writes.
    pub fn word_decl(&mut self) -> DocxResult<()> {
        self.decl("1.0", Some("UTF-8"), Some("yes"))
    }

    pub fn start(&mut self, name: &str, attrs: &[(String, String)], empty: bool) -> DocxResult<()> {
        let mut tag = BytesStart::new(name);
        for (k, v) in attrs {
            tag.push_attribute(Attribute {
                key: QName(k.as_bytes()),
                value: Cow::Borrowed(v.as_bytes()),
            });
        }
        self.emit(if empty {
            Event::Empty(tag)
        } else {
            Event::Start(tag)
        })
    }

    pub fn end(&mut self, name: &str) -> DocxResult<()> {
        self.emit(Event::End(BytesEnd::new(name)))
    }

    /// Plain text; only `&`, `<` and `>` are escaped.
    pub fn text(&mut self, text: &str) -> DocxResult<()> {
        self.emit(Event::Text(BytesText::from_escaped(partial_escape(text))))
    }

    pub fn cdata(&mut self, text: &str) -> DocxResult<()> {
        self.emit(Event::CData(BytesCData::new(text)))
    }

    pub fn comment(&mut self, text: &str) -> DocxResult<()> {
        self.emit(Event::Comment(BytesText::from_escaped(text)))
    }

    pub fn pi(&mut self, content: &str) -> DocxResult<()> {
        self.emit(Event::PI(BytesPI::new(content)))
    }

    pub fn doctype(&mut self, text: &str) -> DocxResult<()> {
        self.emit(Event::DocType(BytesText::from_escaped(text)))
    }

    /// Newline followed by `depth` indentation steps.
    pub fn break_line(&mut self, depth: usize) {
        let out = self.inner.get_mut();
        out.push(b'\n');
        for _ in 0..depth {
            out.extend_from_slice(INDENT);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}
