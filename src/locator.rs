//! Structural position locators.
//!
//! A locator is a path from the content root down to one element:
//!
//! ```text
//! //body/div[1]/p[3]          descoped, what gets persisted
//! id("chapter-2")/p[1]        anchored at an element id
//! //section[@data-page="4"]/div[1]/p[3]   scoped, in-memory only
//! ```
//!
//! Each step names a lower-case tag and the 1-based position among siblings
//! with the same tag. Scoping swaps the `//body` root for a page-unique
//! prefix so locators from different pages never collide in memory;
//! descoping reverses that before anything is stored.

use crate::document::{ContentDocument, Display, NodeId};
use crate::error::{ReaderError, Result};
use crate::geometry::{Axis, DocumentGeometry, Rect};
use crate::layout::{AppliedLayout, LayoutMode, NO_OBSERVE_CLASS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root step of a descoped locator.
pub const BODY_PREFIX: &str = "//body";

const SCOPE_PREFIX: &str = "//section[@data-page=\"";
const SCOPE_SUFFIX: &str = "\"]";

/// Tags the locator considers when looking for the first visible element.
const CANDIDATE_TAGS: &[&str] = &[
    "div", "p", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "img", "svg", "a", "span",
    "blockquote", "figure", "pre",
];

/// Elements that form a paragraph of their own. Used to decide whether the
/// common ancestor of two inline candidates is a good anchor.
const PARAGRAPH_TAGS: &[&str] = &[
    "p", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "figure", "dd", "dt",
    "td", "th",
];

/// Descoped structural path to an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PositionLocator(String);

/// Page-scoped form of a [`PositionLocator`]. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedLocator(String);

#[derive(Debug, PartialEq, Eq)]
enum Root<'a> {
    Body,
    Id(&'a str),
    Page(u32),
}

#[derive(Debug, PartialEq, Eq)]
struct Step<'a> {
    tag: &'a str,
    index: usize,
}

impl PositionLocator {
    /// Parse a locator. Scoped input is descoped.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (root, rest) = split_root(s)?;
        parse_steps(rest)?;
        Ok(match root {
            Root::Page(_) => Self(format!("{}{}", BODY_PREFIX, rest)),
            _ => Self(s.to_string()),
        })
    }

    /// Encode the path to `node`.
    ///
    /// The nearest ancestor-or-self with a unique `id` becomes the root step,
    /// otherwise the path starts at `//body`.
    pub fn encode(doc: &ContentDocument, node: NodeId) -> Self {
        let mut steps = Vec::new();
        let mut current = node;
        let mut prefix = BODY_PREFIX.to_string();

        while current != doc.root() {
            if let Some(id) = doc.attr(current, "id").filter(|id| is_anchor_id(id))
                && doc.find_by_id(id) == Some(current)
            {
                prefix = format!("id(\"{}\")", id);
                break;
            }
            let Some(tag) = doc.tag(current) else {
                break;
            };
            steps.push(format!("{}[{}]", tag, doc.same_tag_index(current)));
            match doc.parent(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }

        steps.reverse();
        let mut path = prefix;
        for step in steps {
            path.push('/');
            path.push_str(&step);
        }
        Self(path)
    }

    /// Locator text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope to a page. Id-rooted locators stay unchanged.
    pub fn scope(&self, page: u32) -> ScopedLocator {
        match self.0.strip_prefix(BODY_PREFIX) {
            Some(rest) => ScopedLocator(format!("{}{}{}{}", SCOPE_PREFIX, page, SCOPE_SUFFIX, rest)),
            None => ScopedLocator(self.0.clone()),
        }
    }

    /// Resolve against a document.
    pub fn resolve(&self, doc: &ContentDocument) -> Option<NodeId> {
        resolve_path(doc, &self.0, None)
    }
}

impl ScopedLocator {
    /// Locator text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strip the page scope.
    pub fn descope(&self) -> PositionLocator {
        match split_root(&self.0) {
            Ok((Root::Page(_), rest)) => PositionLocator(format!("{}{}", BODY_PREFIX, rest)),
            _ => PositionLocator(self.0.clone()),
        }
    }

    /// Resolve against a document. Fails when the scope names another page.
    pub fn resolve(&self, doc: &ContentDocument) -> Option<NodeId> {
        resolve_path(doc, &self.0, Some(doc.page()))
    }
}

impl fmt::Display for PositionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ScopedLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PositionLocator {
    type Error = ReaderError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PositionLocator> for String {
    fn from(value: PositionLocator) -> Self {
        value.0
    }
}

fn is_anchor_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('"')
}

fn split_root(s: &str) -> Result<(Root<'_>, &str)> {
    if let Some(rest) = s.strip_prefix(SCOPE_PREFIX) {
        let (page, rest) = rest
            .split_once(SCOPE_SUFFIX)
            .ok_or_else(|| ReaderError::Locator(format!("Unterminated page scope: {}", s)))?;
        let page = page
            .parse::<u32>()
            .map_err(|_| ReaderError::Locator(format!("Invalid page scope: {}", s)))?;
        return Ok((Root::Page(page), rest));
    }
    if let Some(rest) = s.strip_prefix(BODY_PREFIX)
        && (rest.is_empty() || rest.starts_with('/'))
    {
        return Ok((Root::Body, rest));
    }
    if let Some(rest) = s.strip_prefix("id(\"") {
        let (id, rest) = rest
            .split_once("\")")
            .ok_or_else(|| ReaderError::Locator(format!("Unterminated id step: {}", s)))?;
        if id.is_empty() {
            return Err(ReaderError::Locator(format!("Empty id step: {}", s)));
        }
        return Ok((Root::Id(id), rest));
    }
    Err(ReaderError::Locator(format!("Unknown locator root: {}", s)))
}

fn parse_steps(rest: &str) -> Result<Vec<Step<'_>>> {
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = rest.strip_prefix('/') else {
        return Err(ReaderError::Locator(format!("Expected '/' before: {}", rest)));
    };
    rest.split('/').map(parse_step).collect()
}

fn parse_step(step: &str) -> Result<Step<'_>> {
    let invalid = || ReaderError::Locator(format!("Invalid step: {}", step));
    let (tag, index) = match step.split_once('[') {
        Some((tag, index)) => {
            let index = index
                .strip_suffix(']')
                .and_then(|i| i.parse::<usize>().ok())
                .filter(|i| *i >= 1)
                .ok_or_else(invalid)?;
            (tag, index)
        }
        None => (step, 1),
    };
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ':') {
        return Err(invalid());
    }
    Ok(Step { tag, index })
}

fn resolve_path(doc: &ContentDocument, path: &str, page: Option<u32>) -> Option<NodeId> {
    let (root, rest) = split_root(path).ok()?;
    let start = match root {
        Root::Body => doc.root(),
        Root::Id(id) => doc.find_by_id(id)?,
        Root::Page(scope) => {
            if page.is_some_and(|p| p != scope) {
                tracing::debug!(scope, page = ?page, "Locator scoped to another page");
                return None;
            }
            doc.root()
        }
    };

    parse_steps(rest).ok()?.into_iter().try_fold(start, |node, step| {
        doc.element_children(node)
            .filter(|c| doc.tag(*c).is_some_and(|t| t.eq_ignore_ascii_case(step.tag)))
            .nth(step.index - 1)
    })
}

/// Find the first visible element and encode it.
///
/// `chrome_offset` is the height of any overlay chrome covering the top of
/// the viewport. Returns `None` when nothing suitable is visible; callers
/// keep their last known locator in that case.
pub fn locate<G: DocumentGeometry>(
    doc: &ContentDocument,
    geometry: &G,
    layout: &AppliedLayout,
    chrome_offset: f64,
) -> Option<PositionLocator> {
    let node = first_visible_element(doc, geometry, layout, chrome_offset)?;
    let locator = PositionLocator::encode(doc, node);
    tracing::trace!(node = %node, locator = %locator, "Located reading position");
    Some(locator)
}

/// The element a reader would consider "where I am".
pub fn first_visible_element<G: DocumentGeometry>(
    doc: &ContentDocument,
    geometry: &G,
    layout: &AppliedLayout,
    chrome_offset: f64,
) -> Option<NodeId> {
    let viewport = geometry.viewport();
    let chrome = chrome_offset.clamp(0.0, viewport.height);
    let area = Rect::new(0.0, chrome, viewport.width, viewport.height - chrome);
    if area.width <= 0.0 || area.height <= 0.0 {
        return None;
    }

    let root = doc.root();
    let intersecting: Vec<NodeId> = geometry
        .query_intersecting(area)
        .into_iter()
        .filter(|n| *n != root && is_candidate(doc, *n))
        .collect();

    // Only the innermost candidates count.
    let mut candidates: Vec<(NodeId, Rect)> = intersecting
        .iter()
        .copied()
        .filter(|c| !intersecting.iter().any(|o| o != c && doc.is_ancestor_of(*c, *o)))
        .filter(|c| doc.has_text(*c) || doc.has_graphic(*c))
        .filter_map(|c| geometry.bounding_box(c).map(|r| (c, r)))
        .collect();

    if candidates.is_empty() {
        return None;
    }

    sort_reading_order(&mut candidates, layout);
    pick_anchor(doc, &candidates)
}

fn is_candidate(doc: &ContentDocument, node: NodeId) -> bool {
    let Some(tag) = doc.tag(node) else {
        return false;
    };
    CANDIDATE_TAGS.contains(&tag)
        && doc.display(node) != Display::None
        && doc.is_attached(node)
        && !doc.has_class(node, NO_OBSERVE_CLASS)
        && !doc
            .ancestors(node)
            .any(|a| doc.has_class(a, NO_OBSERVE_CLASS))
}

fn sort_reading_order(candidates: &mut [(NodeId, Rect)], layout: &AppliedLayout) {
    let by_position = |a: &Rect, b: &Rect| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x));

    match layout.mode {
        LayoutMode::DoubleColumn => {
            let axis = layout.paging_axis();
            let half = layout.page_size() / 2.0;
            let column = |r: &Rect| {
                if half > 0.0 {
                    (r.start(axis) / half).floor()
                } else {
                    0.0
                }
            };
            candidates.sort_by(|(_, a), (_, b)| {
                column(a)
                    .total_cmp(&column(b))
                    .then_with(|| match axis {
                        Axis::X => by_position(a, b),
                        Axis::Y => a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)),
                    })
            });
        }
        LayoutMode::Continuous | LayoutMode::SingleColumn => {
            candidates.sort_by(|(_, a), (_, b)| by_position(a, b));
        }
    }
}

fn pick_anchor(doc: &ContentDocument, candidates: &[(NodeId, Rect)]) -> Option<NodeId> {
    let (first, _) = *candidates.first()?;
    if doc.display(first) == Display::Block {
        return Some(first);
    }

    if let Some((second, _)) = candidates.get(1)
        && let Some(common) = doc.common_ancestor(first, *second)
        && common != doc.root()
        && doc.tag(common).is_some_and(|t| PARAGRAPH_TAGS.contains(&t))
    {
        return Some(common);
    }

    let block = doc
        .ancestors(first)
        .take_while(|a| *a != doc.root())
        .find(|a| doc.display(*a) != Display::Inline);
    Some(block.unwrap_or(first))
}
