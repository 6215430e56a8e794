use quick_xml::events::Event;
use quick_xml::Reader;

use crate::docx::xml::{raw_attrs, utf8, XmlWriter};
use crate::error::{DocxError, DocxResult};

pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    CData(String),
    Comment(String),
    PI(String),
    DocType(String),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

/// Arena-backed XML tree with explicit parent links.
///
/// Node ids stay valid for the lifetime of the tree: removal only detaches a subtree, so
/// ids captured before a mutation can still be compared afterwards.
#[derive(Clone, Debug)]
pub struct XmlTree {
    pub name: String,
    pub decl: Option<Declaration>,
    nodes: Vec<Node>,
}

pub const DOCUMENT: NodeId = 0;

impl XmlTree {
    /// Empty tree whose root element is `root_name`.
    pub fn with_root(part_name: &str, root_name: &str, attrs: Vec<(String, String)>) -> Self {
        let mut tree = Self::empty(part_name);
        let root = tree.create_element(root_name, attrs);
        tree.append_child(DOCUMENT, root);
        tree.decl = Some(Declaration {
            version: "1.0".to_string(),
            encoding: Some("UTF-8".to_string()),
            standalone: Some("yes".to_string()),
        });
        tree
    }

    fn empty(part_name: &str) -> Self {
        Self {
            name: part_name.to_string(),
            decl: None,
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn parse(part_name: &str, bytes: &[u8]) -> DocxResult<Self> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);

        let mut tree = Self::empty(part_name);
        let mut open: Vec<NodeId> = vec![DOCUMENT];
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let ev = reader.read_event_into(&mut buf).map_err(|e| {
                DocxError::xml(part_name, format!("{e} at byte {}", reader.buffer_position()))
            })?;
            let parent = *open.last().unwrap_or(&DOCUMENT);
            let leaf = match ev {
                Event::Eof => break,
                Event::Decl(d) => {
                    tree.decl = Some(Declaration {
                        version: utf8(d.version().map_err(|e| DocxError::xml(part_name, e))?),
                        encoding: d.encoding().and_then(Result::ok).map(utf8),
                        standalone: d.standalone().and_then(Result::ok).map(utf8),
                    });
                    continue;
                }
                Event::Start(s) => {
                    let id = tree.create_element(&utf8(s.name().as_ref()), raw_attrs(part_name, &s)?);
                    tree.append_child(parent, id);
                    open.push(id);
                    continue;
                }
                Event::Empty(s) => {
                    let id = tree.create_element(&utf8(s.name().as_ref()), raw_attrs(part_name, &s)?);
                    tree.append_child(parent, id);
                    continue;
                }
                Event::End(e) => {
                    let name = utf8(e.name().as_ref());
                    match open.pop().filter(|&id| id != DOCUMENT) {
                        Some(id) if tree.is_named(id, &name) => {}
                        _ => {
                            return Err(DocxError::xml(
                                part_name,
                                format!("unexpected end tag </{name}>"),
                            ))
                        }
                    }
                    continue;
                }
                // Text outside the root element is insignificant whitespace.
                Event::Text(_) if parent == DOCUMENT => continue,
                Event::Text(t) => NodeKind::Text(
                    t.unescape()
                        .map_err(|e| DocxError::xml(part_name, e))?
                        .into_owned(),
                ),
                Event::CData(t) => NodeKind::CData(utf8(t.into_inner())),
                Event::Comment(t) => NodeKind::Comment(utf8(t.into_inner())),
                Event::PI(t) => NodeKind::PI(format!("{}{}", utf8(t.target()), utf8(t.content()))),
                Event::DocType(t) => NodeKind::DocType(utf8(t.into_inner())),
            };
            let id = tree.push(leaf);
            tree.append_child(parent, id);
        }
        if open.len() != 1 {
            return Err(DocxError::xml(part_name, "unclosed element at end of input"));
        }
        if tree.root().is_none() {
            return Err(DocxError::xml(part_name, "no root element"));
        }
        Ok(tree)
    }

    /// Writes `id` and its subtree; childless elements become empty-element tags.
    pub(crate) fn write_node(&self, id: NodeId, w: &mut XmlWriter) -> DocxResult<()> {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Document => {
                for &c in &node.children {
                    self.write_node(c, w)?;
                }
                Ok(())
            }
            NodeKind::Element { name, attrs } if node.children.is_empty() => {
                w.start(name, attrs, true)
            }
            NodeKind::Element { name, attrs } => {
                w.start(name, attrs, false)?;
                for &c in &node.children {
                    self.write_node(c, w)?;
                }
                w.end(name)
            }
            NodeKind::Text(t) => w.text(t),
            NodeKind::CData(t) => w.cdata(t),
            NodeKind::Comment(t) => w.comment(t),
            NodeKind::PI(c) => w.pi(c),
            NodeKind::DocType(t) => w.doctype(t),
        }
    }

    /// Compact serialization with the tree's own declaration, no indentation added.
    pub fn to_bytes(&self) -> DocxResult<Vec<u8>> {
        let mut w = XmlWriter::new(&self.name);
        if let Some(d) = &self.decl {
            w.decl(&d.version, d.encoding.as_deref(), d.standalone.as_deref())?;
        }
        self.write_node(DOCUMENT, &mut w)?;
        Ok(w.into_bytes())
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn root(&self) -> Option<NodeId> {
        self.nodes[DOCUMENT]
            .children
            .iter()
            .copied()
            .find(|&c| self.is_element(c))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id].kind, NodeKind::Element { .. })
    }

    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_named(&self, id: NodeId, name: &str) -> bool {
        self.name_of(id) == Some(name)
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    /// Raw (escaped) attribute value.
    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.is_element(c))
    }

    pub fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.element_children(id).find(|&c| self.is_named(c, name))
    }

    pub fn children_named<'a>(&'a self, id: NodeId, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.element_children(id).filter(move |&c| self.is_named(c, name))
    }

    /// All descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n].children.iter().rev().copied());
        }
        out
    }

    pub fn descendants_named(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.is_named(n, name))
            .collect()
    }

    /// First descendant element (depth-first) with the given name.
    pub fn find(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .find(|&n| self.is_named(n, name))
    }

    /// Nearest ancestor (or self) satisfying `pred`.
    pub fn ancestor_where(&self, id: NodeId, pred: impl Fn(NodeId) -> bool) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if pred(n) {
                return Some(n);
            }
            cur = self.nodes[n].parent;
        }
        None
    }

    /// True while the node is reachable from the document node.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.ancestor_where(id, |n| n == DOCUMENT).is_some()
    }

    pub fn create_element(&mut self, name: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.push(NodeKind::Element {
            name: name.to_string(),
            attrs,
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Inserts `child` at `index` among `parent`'s children (clamped to the end).
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let len = self.nodes[parent].children.len();
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.insert(index.min(len), child);
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.nodes[id].parent?;
        self.nodes[parent].children.iter().position(|&c| c == id)
    }

    /// Detaches `id` (and its subtree) from its parent. Returns false if it had none.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.nodes[id].parent.take() else {
            return false;
        };
        self.nodes[parent].children.retain(|&c| c != id);
        true
    }

    /// Text and CDATA held directly by `id`.
    pub fn text_of_node(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &c in &self.nodes[id].children {
            if let NodeKind::Text(s) | NodeKind::CData(s) = &self.nodes[c].kind {
                out.push_str(s);
            }
        }
        out
    }

    /// Concatenated text of every `text_tag` element below `id`.
    pub fn text_of(&self, id: NodeId, text_tag: &str) -> String {
        self.descendants_named(id, text_tag)
            .into_iter()
            .map(|t| self.text_of_node(t))
            .collect()
    }

    /// Element names, attributes and non-whitespace text of the attached tree, in order.
    /// Two trees with equal signatures serialize to equivalent documents.
    pub fn signature(&self) -> Vec<String> {
        let mut out = Vec::new();
        for n in self.descendants(DOCUMENT) {
            match &self.nodes[n].kind {
                NodeKind::Element { name, attrs } => {
                    let mut line = format!("<{name}");
                    for (k, v) in attrs {
                        line.push_str(&format!(" {k}={v}"));
                    }
                    line.push_str(&format!(" #{}", self.element_children(n).count()));
                    out.push(line);
                }
                NodeKind::Text(t) | NodeKind::CData(t) => {
                    if !t.trim().is_empty() {
                        out.push(format!("T:{t}"));
                    }
                }
                _ => {}
            }
        }
        out
    }
}
