//! Selector resolution
//!
//! Turns a live page into a `DomTree`, renders stable locators for nodes of
//! that tree, and converts structural paths back into CSS locators a driver
//! can act on.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::dom::{parse_segments, DomNode, DomTree, RawTree, StructuralPath};
use crate::browser::driver::BrowserDriver;
use crate::core::{BrowserConfig, PageSnapshot, PilotError, Result};

static CSS_IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?[_a-zA-Z][_a-zA-Z0-9-]*$").expect("css identifier pattern is valid")
});

/// In-page DOM extraction; `__MAX_NODES__` is substituted before use
///
/// Elements outside the allow-list are flattened (their children hoisted to
/// the nearest kept ancestor, keeping their true paths). Subtrees in the
/// deny-list are skipped entirely.
const EXTRACT_SCRIPT: &str = r#"(() => {
  const MAX_NODES = __MAX_NODES__;
  const ALLOW = new Set(['BODY','MAIN','SECTION','ARTICLE','ASIDE','HEADER','FOOTER','NAV','DIV',
    'FORM','FIELDSET','H1','H2','H3','H4','H5','H6','P','UL','OL','LI','TABLE','THEAD','TBODY',
    'TR','TD','TH','A','BUTTON','INPUT','TEXTAREA','SELECT','OPTION','LABEL','DIALOG','DETAILS',
    'SUMMARY','IMG']);
  const DENY = new Set(['SCRIPT','STYLE','NOSCRIPT','TEMPLATE','META','LINK','HEAD','TITLE',
    'BASE','SVG','CANVAS','IFRAME','OBJECT','EMBED']);
  const KEEP = ['data-testid','id','aria-label','name','type','class','href','placeholder',
    'role','value','title','alt','for'];
  const nodes = [];
  let nextId = 0;
  const segment = (el) => {
    let i = 1;
    for (let s = el.previousElementSibling; s; s = s.previousElementSibling) {
      if (s.tagName === el.tagName) i++;
    }
    return el.tagName.toLowerCase() + '[' + i + ']';
  };
  const element = (el, path) => {
    const attributes = {};
    for (const name of KEEP) {
      const v = el.getAttribute(name);
      if (v !== null && v !== '') attributes[name] = String(v).slice(0, 200);
    }
    const node = { kind: 'element', id: nextId++, tag: el.tagName.toLowerCase(), attributes,
      children: [], path };
    nodes.push(node);
    return node;
  };
  const text = (owner, raw, path) => {
    const t = (raw || '').replace(/\s+/g, ' ').trim();
    if (!t || nodes.length >= MAX_NODES) return;
    const node = { kind: 'text', id: nextId++, text: t.slice(0, 200), path };
    nodes.push(node);
    owner.children.push(node.id);
  };
  const walk = (el, path, owner) => {
    for (const child of Array.from(el.childNodes)) {
      if (nodes.length >= MAX_NODES) return;
      try {
        if (child.nodeType === Node.TEXT_NODE) { text(owner, child.textContent, path); continue; }
        if (child.nodeType !== Node.ELEMENT_NODE) continue;
        const tag = child.tagName.toUpperCase();
        if (DENY.has(tag)) continue;
        if (tag === 'A' && !child.hasAttribute('href') && child.childNodes.length === 0) continue;
        const childPath = path + '/' + segment(child);
        if (ALLOW.has(tag)) {
          const node = element(child, childPath);
          owner.children.push(node.id);
          walk(child, childPath, node);
        } else {
          walk(child, childPath, owner);
        }
      } catch (e) {}
    }
  };
  if (!document.body) return JSON.stringify({ root: null, nodes: [] });
  const root = element(document.body, '/body[1]');
  try { walk(document.body, '/body[1]', root); } catch (e) {}
  return JSON.stringify({ root: root.id, nodes });
})()"#;

/// In-page lookup of a clickable element by visible text; `__NEEDLE__` is
/// substituted with a JSON string literal
const LOCATE_BY_TEXT_SCRIPT: &str = r#"((needle) => {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
  const want = norm(needle);
  const pathOf = (el) => {
    const parts = [];
    for (let e = el; e && e !== document.documentElement; e = e.parentElement) {
      let i = 1;
      for (let s = e.previousElementSibling; s; s = s.previousElementSibling) {
        if (s.tagName === e.tagName) i++;
      }
      parts.unshift(e.tagName.toLowerCase() + '[' + i + ']');
    }
    return '/' + parts.join('/');
  };
  const candidates = Array.from(document.querySelectorAll(
    'a,button,input[type=submit],input[type=button],[role=button],[role=link],label,summary,option'));
  const textOf = (el) => norm(el.innerText || el.value || el.getAttribute('aria-label'));
  const hit = candidates.find((el) => textOf(el) === want)
    || candidates.find((el) => textOf(el).includes(want));
  return hit ? pathOf(hit) : null;
})(__NEEDLE__)"#;

/// A CSS locator a driver can act on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(css: impl Into<String>) -> Self {
        Self(css.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn quote_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Convert a structural path into an equivalent CSS locator
///
/// Total: an empty path or `/` addresses the body, malformed segments are
/// skipped and a missing index is treated as 1.
pub fn to_locator(path: &str) -> Locator {
    let segments = parse_segments(path);
    if segments.is_empty() {
        return Locator::new("body");
    }
    let css = segments
        .iter()
        .map(|s| format!("{}:nth-of-type({})", s.tag, s.index.unwrap_or(1)))
        .collect::<Vec<_>>()
        .join(" > ");
    Locator(css)
}

/// Structural path of a node; text nodes report their enclosing element
pub fn structural_path_of(node: &DomNode) -> &StructuralPath {
    node.path()
}

/// Most stable locator for a node
///
/// Tries, in order: test id, element id, accessible label, form name, input
/// type, class list, and finally the structural path.
pub fn canonical_locator(node: &DomNode) -> Locator {
    let element = match node {
        DomNode::Element(e) => e,
        DomNode::Text(t) => return to_locator(t.path.as_str()),
    };
    let tag = &element.tag;

    if let Some(test_id) = element.attr("data-testid") {
        return Locator(format!("[data-testid=\"{}\"]", quote_attr(test_id)));
    }
    if let Some(id) = element.attr("id") {
        return if CSS_IDENT.is_match(id) {
            Locator(format!("#{}", id))
        } else {
            Locator(format!("[id=\"{}\"]", quote_attr(id)))
        };
    }
    for attr in ["aria-label", "name", "type"] {
        if let Some(value) = element.attr(attr) {
            return Locator(format!("{}[{}=\"{}\"]", tag, attr, quote_attr(value)));
        }
    }
    if let Some(class) = element.attr("class") {
        let classes: Vec<&str> = class
            .split_whitespace()
            .filter(|c| CSS_IDENT.is_match(c))
            .collect();
        if !classes.is_empty() {
            return Locator(format!("{}.{}", tag, classes.join(".")));
        }
    }

    to_locator(element.path.as_str())
}

/// Resolve a reference the oracle produced into something a driver accepts
///
/// Structural paths become CSS; anything else is assumed to already be CSS.
pub fn ground(reference: &str) -> Locator {
    if StructuralPath::is_structural(reference) {
        to_locator(reference)
    } else {
        Locator::new(reference.trim())
    }
}

/// Extracts DOM snapshots and resolves locators against live pages
#[derive(Debug, Clone)]
pub struct SelectorResolver {
    max_nodes: usize,
    summary_max_chars: usize,
}

impl Default for SelectorResolver {
    fn default() -> Self {
        Self::from_config(&BrowserConfig::default())
    }
}

impl SelectorResolver {
    pub fn new(max_nodes: usize, summary_max_chars: usize) -> Self {
        Self {
            max_nodes: max_nodes.max(1),
            summary_max_chars,
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Self {
        Self::new(config.max_dom_nodes, config.summary_max_chars)
    }

    /// Extraction script with this resolver's node cap
    pub fn extraction_script(&self) -> String {
        EXTRACT_SCRIPT.replace("__MAX_NODES__", &self.max_nodes.to_string())
    }

    /// Extract the DOM of the current page
    ///
    /// Never fails: a script error or unparseable result yields an empty tree.
    pub async fn extract(&self, driver: &dyn BrowserDriver) -> DomTree {
        let value = match driver.evaluate(&self.extraction_script()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "DOM extraction failed, using empty tree");
                return DomTree::empty();
            }
        };

        match parse_raw_tree(value) {
            Ok(raw) => {
                let tree = DomTree::from_raw(raw);
                debug!(nodes = tree.len(), "extracted DOM");
                tree
            }
            Err(e) => {
                warn!(error = %e, "unparseable DOM extraction, using empty tree");
                DomTree::empty()
            }
        }
    }

    /// Observe the page: url, title and DOM
    ///
    /// Fails only when the page itself cannot be reached.
    pub async fn snapshot(&self, driver: &dyn BrowserDriver) -> Result<PageSnapshot> {
        let url = driver.current_url().await?;
        let title = driver.title().await.unwrap_or_else(|e| {
            debug!(error = %e, "could not read page title");
            String::new()
        });
        let tree = self.extract(driver).await;
        let summary = tree.summarize(self.summary_max_chars);
        Ok(PageSnapshot::new(url, title, summary).with_tree(tree))
    }

    /// Find a clickable element by its visible text
    ///
    /// Asks the page first; when no clickable element matches, falls back to
    /// the innermost element of a fresh extraction whose text contains it.
    pub async fn locate_by_text(
        &self,
        driver: &dyn BrowserDriver,
        text: &str,
    ) -> Result<Option<Locator>> {
        let needle = serde_json::to_string(text)?;
        let script = LOCATE_BY_TEXT_SCRIPT.replace("__NEEDLE__", &needle);

        match driver.evaluate(&script).await? {
            serde_json::Value::String(path) if StructuralPath::is_structural(&path) => {
                Ok(Some(to_locator(&path)))
            }
            serde_json::Value::Null => Ok(self.locate_in_tree(driver, text).await),
            serde_json::Value::String(s) if s.trim() == "null" || s.trim().is_empty() => {
                Ok(self.locate_in_tree(driver, text).await)
            }
            other => Err(PilotError::driver(format!(
                "unexpected text lookup result: {}",
                other
            ))),
        }
    }

    async fn locate_in_tree(&self, driver: &dyn BrowserDriver, text: &str) -> Option<Locator> {
        let tree = self.extract(driver).await;
        let hit = tree.find_by_text(text).into_iter().next()?;
        let locator = canonical_locator(tree.get(hit)?);
        debug!(text, locator = %locator, "text matched in extracted tree");
        Some(locator)
    }
}

/// Script output may arrive as an object or as a JSON string holding one
fn parse_raw_tree(value: serde_json::Value) -> Result<RawTree> {
    let value = match value {
        serde_json::Value::String(s) => serde_json::from_str(&s)?,
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}
