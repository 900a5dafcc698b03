//! DOM snapshot model
//!
//! A `DomTree` is one extraction of a live page. Node ids are scoped to that
//! extraction: every tree gets a fresh extraction number, and looking up an id
//! from another tree yields nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::browser::selector::canonical_locator;

static NEXT_EXTRACTION: AtomicU64 = AtomicU64::new(1);

/// Tags that are worth showing to the oracle even without text of their own
const SUMMARY_TAGS: &[&str] = &[
    "a", "button", "input", "textarea", "select", "option", "label", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "summary", "dialog",
];

/// Identifier of a node within one extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    extraction: u64,
    index: u32,
}

impl NodeId {
    /// Position of the node in extraction order
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}.{}", self.extraction, self.index)
    }
}

/// One step of a structural path: a tag and its 1-based same-tag sibling index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub tag: String,
    pub index: Option<u32>,
}

/// Position-based address of a node from the document root,
/// e.g. `/body[1]/div[2]/a[1]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuralPath(String);

impl StructuralPath {
    /// Marker every structural path starts with
    pub const ROOT: &'static str = "/";

    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a locator string uses structural path notation
    pub fn is_structural(reference: &str) -> bool {
        reference.trim_start().starts_with(Self::ROOT)
    }

    /// Parse the path leniently; malformed segments are skipped and bad
    /// indices become `None`
    pub fn segments(&self) -> Vec<PathSegment> {
        parse_segments(&self.0)
    }
}

impl fmt::Display for StructuralPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn parse_segments(path: &str) -> Vec<PathSegment> {
    path.split('/')
        .filter_map(|raw| {
            let raw = raw.trim();
            let (tag_part, index) = match raw.find('[') {
                Some(open) => {
                    let rest = &raw[open + 1..];
                    let index = rest
                        .split(']')
                        .next()
                        .and_then(|n| n.trim().parse::<u32>().ok())
                        .filter(|n| *n > 0);
                    (&raw[..open], index)
                }
                None => (raw, None),
            };

            let tag: String = tag_part
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
                .to_ascii_lowercase();

            if tag.is_empty() {
                None
            } else {
                Some(PathSegment { tag, index })
            }
        })
        .collect()
}

/// An element kept by extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<NodeId>,
    pub path: StructuralPath,
}

impl ElementNode {
    /// Attribute value, if present and non-empty
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// A run of visible text; its path is that of the enclosing element
#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub path: StructuralPath,
}

/// Node of a DOM snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Element(ElementNode),
    Text(TextNode),
}

impl DomNode {
    pub fn path(&self) -> &StructuralPath {
        match self {
            DomNode::Element(e) => &e.path,
            DomNode::Text(t) => &t.path,
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            DomNode::Element(e) => Some(e),
            DomNode::Text(_) => None,
        }
    }
}

/// Wire shape produced by the in-page extraction script
#[derive(Debug, Deserialize)]
pub(crate) struct RawTree {
    #[serde(default)]
    pub root: Option<u32>,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum RawNode {
    Element {
        id: u32,
        tag: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<u32>,
        path: String,
    },
    Text {
        id: u32,
        text: String,
        path: String,
    },
}

impl RawNode {
    fn id(&self) -> u32 {
        match self {
            RawNode::Element { id, .. } | RawNode::Text { id, .. } => *id,
        }
    }
}

/// One extraction of a page
///
/// Invariants: the root is always present and is an element, every child id
/// resolves within the tree, and ids are unique.
#[derive(Debug, Clone)]
pub struct DomTree {
    extraction: u64,
    root: NodeId,
    nodes: HashMap<NodeId, DomNode>,
}

impl DomTree {
    /// A tree holding only an empty body
    pub fn empty() -> Self {
        let extraction = NEXT_EXTRACTION.fetch_add(1, Ordering::Relaxed);
        let root = NodeId {
            extraction,
            index: 0,
        };
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            DomNode::Element(ElementNode {
                tag: "body".to_string(),
                attributes: BTreeMap::new(),
                children: Vec::new(),
                path: StructuralPath::new("/body[1]"),
            }),
        );
        Self {
            extraction,
            root,
            nodes,
        }
    }

    /// Build a tree from script output, keeping only what is reachable from
    /// the root; dangling child references are dropped
    pub(crate) fn from_raw(raw: RawTree) -> Self {
        let Some(root_raw) = raw.root else {
            return Self::empty();
        };

        let mut by_id: HashMap<u32, RawNode> = HashMap::with_capacity(raw.nodes.len());
        for node in raw.nodes {
            by_id.entry(node.id()).or_insert(node);
        }

        if !matches!(by_id.get(&root_raw), Some(RawNode::Element { .. })) {
            return Self::empty();
        }

        let extraction = NEXT_EXTRACTION.fetch_add(1, Ordering::Relaxed);
        let id = |index: u32| NodeId { extraction, index };

        let mut nodes = HashMap::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root_raw];
        seen.insert(root_raw);

        while let Some(current) = stack.pop() {
            let Some(raw_node) = by_id.remove(&current) else {
                continue;
            };
            let node = match raw_node {
                RawNode::Element {
                    tag,
                    attributes,
                    children,
                    path,
                    ..
                } => {
                    let mut kept = Vec::with_capacity(children.len());
                    for child in children {
                        if by_id.contains_key(&child) && seen.insert(child) {
                            kept.push(id(child));
                            stack.push(child);
                        }
                    }
                    DomNode::Element(ElementNode {
                        tag: tag.to_ascii_lowercase(),
                        attributes,
                        children: kept,
                        path: StructuralPath::new(path),
                    })
                }
                RawNode::Text { text, path, .. } => DomNode::Text(TextNode {
                    text,
                    path: StructuralPath::new(path),
                }),
            };
            nodes.insert(id(current), node);
        }

        Self {
            extraction,
            root: id(root_raw),
            nodes,
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> &DomNode {
        // The root is inserted by every constructor and never removed.
        &self.nodes[&self.root]
    }

    /// Look up a node; ids from other extractions never resolve
    pub fn get(&self, id: NodeId) -> Option<&DomNode> {
        if id.extraction != self.extraction {
            return None;
        }
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree holds nothing but its root
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Child ids of an element, in document order
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.get(id) {
            Some(DomNode::Element(e)) => &e.children,
            _ => &[],
        }
    }

    /// Node ids in document (pre-)order
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// All visible text under a node, whitespace-joined
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.get(current) {
                Some(DomNode::Text(t)) => parts.push(t.text.as_str()),
                Some(DomNode::Element(e)) => stack.extend(e.children.iter().rev().copied()),
                None => {}
            }
        }
        parts.join(" ")
    }

    /// Text directly inside an element, not inside child elements
    fn own_text(&self, element: &ElementNode) -> String {
        element
            .children
            .iter()
            .filter_map(|c| match self.get(*c) {
                Some(DomNode::Text(t)) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Elements whose text contains `needle` (case-insensitive), innermost first
    pub fn find_by_text(&self, needle: &str) -> Vec<NodeId> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<NodeId> = self
            .preorder()
            .into_iter()
            .filter(|id| {
                matches!(self.get(*id), Some(DomNode::Element(_)))
                    && self.text_content(*id).to_lowercase().contains(&needle)
            })
            .collect();
        // Deeper matches are more specific than their ancestors
        hits.sort_by_key(|id| std::cmp::Reverse(self.depth_of(*id)));
        hits
    }

    fn depth_of(&self, target: NodeId) -> usize {
        self.get(target)
            .map(|n| n.path().segments().len())
            .unwrap_or_default()
    }

    /// Compact, line-per-element rendering for prompts
    ///
    /// Each line carries the element's structural path so the oracle can
    /// refer back to it.
    pub fn summarize(&self, max_chars: usize) -> String {
        let mut output = String::new();
        let mut stack = vec![(self.root, 0usize)];

        while let Some((id, depth)) = stack.pop() {
            let Some(node @ DomNode::Element(element)) = self.get(id) else {
                continue;
            };

            let own_text = self.own_text(element);
            let shown = SUMMARY_TAGS.contains(&element.tag.as_str()) || !own_text.is_empty();
            let child_depth = if shown { depth + 1 } else { depth };

            if shown {
                let mut line = format!("{}{}", "  ".repeat(depth), element.tag);
                for attr in ["id", "name", "type", "placeholder", "aria-label", "href", "value"] {
                    if let Some(v) = element.attr(attr) {
                        let v: String = v.chars().take(60).collect();
                        line.push_str(&format!(" {}=\"{}\"", attr, v));
                    }
                }
                if !own_text.is_empty() {
                    let text: String = own_text.chars().take(80).collect();
                    line.push_str(&format!(" \"{}\"", text));
                }
                line.push_str(&format!(" @ {}", element.path));
                let locator = canonical_locator(node);
                if !locator.as_str().contains(":nth-of-type(") {
                    line.push_str(&format!(" => {}", locator));
                }
                line.push('\n');

                if output.len() + line.len() > max_chars {
                    output.push_str("... [truncated]\n");
                    break;
                }
                output.push_str(&line);
            }

            for child in element.children.iter().rev() {
                stack.push((*child, child_depth));
            }
        }

        if output.is_empty() {
            "(empty page)".to_string()
        } else {
            output
        }
    }
}
