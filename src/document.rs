//! Rendered content tree for one chapter page.
//!
//! The tree is an arena: every node lives in one vector and links to its
//! parent and children by index. The `body` element is the content root
//! wrapper; everything the reader observes hangs below it.

use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

mod parse;

/// Index of a node inside a [`ContentDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one loaded document.
///
/// Every parsed or constructed document gets a fresh token, so work that was
/// scheduled against a previous page can detect that it is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl DocumentToken {
    fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// How an element participates in layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    /// Starts its own block box.
    Block,
    /// Flows inside the surrounding line boxes.
    Inline,
    /// Not rendered.
    None,
}

/// Element payload.
#[derive(Debug, Clone)]
pub struct Element {
    /// Lower-case local tag name.
    pub tag: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    /// Inline style properties applied by the layout coordinator or markup.
    pub style: BTreeMap<String, String>,
}

/// Node payload.
#[derive(Debug, Clone)]
pub enum NodeData {
    /// Element node.
    Element(Element),
    /// Text run.
    Text(String),
}

/// A node in the arena.
#[derive(Debug, Clone)]
pub struct Node {
    /// Payload.
    pub data: NodeData,
    /// Parent node, `None` for the root and for detached nodes.
    pub parent: Option<NodeId>,
    /// Children in document order.
    pub children: Vec<NodeId>,
}

/// Tags that flow inline unless styled otherwise.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "br", "cite", "code", "em", "font", "i", "img", "kbd",
    "label", "mark", "q", "ruby", "rt", "s", "samp", "small", "span", "strong", "sub", "sup",
    "svg", "time", "tt", "u", "var", "wbr", "image",
];

/// Tags that never render.
const HIDDEN_TAGS: &[&str] = &["head", "link", "meta", "script", "style", "title", "template"];

/// Tags that carry style information rather than content.
pub const STYLE_TAGS: &[&str] = &["style", "link", "script"];

/// Tags that count as graphics for emptiness checks.
const GRAPHIC_TAGS: &[&str] = &["img", "svg", "image"];

/// The rendered tree for one page unit.
#[derive(Debug, Clone)]
pub struct ContentDocument {
    nodes: Vec<Node>,
    root: NodeId,
    page: u32,
    token: DocumentToken,
}

impl ContentDocument {
    /// Create a document that only contains an empty `body`.
    pub fn empty(page: u32) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            page,
            token: DocumentToken::next(),
        };
        doc.root = doc.alloc(NodeData::Element(Element::new("body")), None);
        doc
    }

    /// Parse page markup into a document.
    ///
    /// Fragments without an `html`/`body` wrapper are accepted.
    pub fn parse(markup: &str, page: u32) -> Result<Self> {
        parse::parse_markup(markup, page)
    }

    /// Server page number this document renders.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Identity token of this document.
    pub fn token(&self) -> DocumentToken {
        self.token
    }

    /// The `body` content root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn alloc(&mut self, data: NodeData, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            data,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(id);
        }
        id
    }

    /// Append a new element under `parent`.
    pub fn append_element(&mut self, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let mut element = Element::new(tag);
        element.attrs = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        element.style = parse_inline_style(element.attr("style").unwrap_or_default());
        self.alloc(NodeData::Element(element), Some(parent))
    }

    /// Append a text run under `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()), Some(parent))
    }

    /// Detach a node from the tree. Its arena slot stays allocated.
    pub fn detach(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        if let Some(parent) = self.nodes[id.index()].parent.take() {
            self.nodes[parent.index()].children.retain(|c| *c != id);
        }
    }

    /// Append a detached node back under `parent`.
    pub fn attach(&mut self, parent: NodeId, id: NodeId) {
        if id == self.root || id == parent || self.is_ancestor_of(id, parent) {
            return;
        }
        self.detach(id);
        self.nodes[id.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(id);
    }

    /// Number of arena slots, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Element payload, if the node is an element.
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.node(id).data {
            NodeData::Element(e) => Some(e),
            NodeData::Text(_) => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.index()].data {
            NodeData::Element(e) => Some(e),
            NodeData::Text(_) => None,
        }
    }

    /// Tag name of an element node.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.tag.as_str())
    }

    /// Attribute value of an element node.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.attr(name))
    }

    /// Whether the element carries a CSS class.
    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .is_some_and(|c| c.split_ascii_whitespace().any(|c| c == class))
    }

    /// Parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Children of a node.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Element children of a node.
    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.element(*c).is_some())
    }

    /// Ancestors from the parent up to and including the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), |n| self.parent(*n))
    }

    /// Whether `ancestor` strictly contains `node`.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|a| a == ancestor)
    }

    /// Whether the node is attached below the root (or is the root).
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.is_ancestor_of(self.root, id)
    }

    /// Pre-order traversal of `id` and its descendants.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    /// All attached element nodes in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|n| self.element(*n).is_some())
            .collect()
    }

    /// Lowest common ancestor of two nodes (a node counts as its own ancestor).
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let chain: Vec<NodeId> = std::iter::once(a).chain(self.ancestors(a)).collect();
        std::iter::once(b)
            .chain(self.ancestors(b))
            .find(|n| chain.contains(n))
    }

    /// Concatenated text below a node.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        for n in self.descendants(id) {
            if let NodeData::Text(t) = &self.node(n).data {
                text.push_str(t);
            }
        }
        text
    }

    /// Whether the node contains any non-whitespace text.
    pub fn has_text(&self, id: NodeId) -> bool {
        self.descendants(id).into_iter().any(|n| match &self.node(n).data {
            NodeData::Text(t) => !t.trim().is_empty(),
            NodeData::Element(_) => false,
        })
    }

    /// Whether the node is or contains an image/graphic element.
    pub fn has_graphic(&self, id: NodeId) -> bool {
        self.descendants(id)
            .into_iter()
            .any(|n| self.tag(n).is_some_and(|t| GRAPHIC_TAGS.contains(&t)))
    }

    /// Effective display class of a node.
    pub fn display(&self, id: NodeId) -> Display {
        let Some(element) = self.element(id) else {
            return Display::Inline;
        };
        match element.style.get("display").map(String::as_str) {
            Some("none") => return Display::None,
            Some("block") | Some("flex") | Some("grid") | Some("list-item") | Some("table") => {
                return Display::Block;
            }
            Some("inline") | Some("inline-block") | Some("inline-flex") => {
                return Display::Inline;
            }
            _ => {}
        }
        if HIDDEN_TAGS.contains(&element.tag.as_str()) {
            Display::None
        } else if INLINE_TAGS.contains(&element.tag.as_str()) {
            Display::Inline
        } else {
            Display::Block
        }
    }

    /// Inline style property of an element.
    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        self.element(id)
            .and_then(|e| e.style.get(property))
            .map(String::as_str)
    }

    /// Set an inline style property on an element.
    pub fn set_style(&mut self, id: NodeId, property: &str, value: impl Into<String>) {
        if let Some(e) = self.element_mut(id) {
            e.style.insert(property.to_string(), value.into());
        }
    }

    /// Remove an inline style property from an element.
    pub fn remove_style(&mut self, id: NodeId, property: &str) {
        if let Some(e) = self.element_mut(id) {
            e.style.remove(property);
        }
    }

    /// Find an attached element by its `id` attribute.
    pub fn find_by_id(&self, value: &str) -> Option<NodeId> {
        self.elements()
            .into_iter()
            .find(|n| self.attr(*n, "id") == Some(value))
    }

    /// 1-based position of an element among its same-tag siblings.
    pub fn same_tag_index(&self, id: NodeId) -> usize {
        let (Some(parent), Some(tag)) = (self.parent(id), self.tag(id)) else {
            return 1;
        };
        self.element_children(parent)
            .filter(|c| self.tag(*c) == Some(tag))
            .position(|c| c == id)
            .map_or(1, |p| p + 1)
    }

    /// Image elements in document order.
    pub fn images(&self) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|n| self.tag(*n) == Some("img"))
            .collect()
    }
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            style: BTreeMap::new(),
        }
    }

    /// Attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a `style="a: b; c: d"` attribute into a property map.
pub fn parse_inline_style(style: &str) -> BTreeMap<String, String> {
    style
        .split(';')
        .filter_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            let (k, v) = (k.trim(), v.trim());
            (!k.is_empty() && !v.is_empty()).then(|| (k.to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}
