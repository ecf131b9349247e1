//! Headless flow layout.
//!
//! A deliberately small layout engine: text is measured with a fixed
//! advance per character, images use their `width`/`height` attributes, and
//! column layouts flow paragraphs line by line into fixed-size columns. It is
//! good enough to drive the locator and pager without a browser.
//!
//! Layout happens in logical coordinates (inline axis, block axis) and is
//! mapped to physical x/y at the end: horizontal writing keeps inline on x,
//! vertical writing puts inline on y. Block progression always runs toward
//! increasing coordinates.

use super::{Axis, DocumentGeometry, ImageLoadState, Margins, Rect, Size, ViewportMetrics};
use crate::document::{ContentDocument, Display, DocumentToken, NodeData, NodeId};
use crate::layout::{AppliedLayout, FILLER_CLASS, WritingDirection};
use std::collections::HashMap;

/// Average glyph advance as a fraction of the font size.
const CHAR_ADVANCE_EM: f64 = 0.5;

/// Size given to images without intrinsic dimensions.
const DEFAULT_IMAGE: (f64, f64) = (300.0, 200.0);

const EPSILON: f64 = 0.01;

/// Headless [`DocumentGeometry`] implementation.
#[derive(Debug, Clone)]
pub struct FlowGeometry {
    viewport: Size,
    scroll: [f64; 2],
    extent: [f64; 2],
    boxes: HashMap<NodeId, Rect>,
    margins: HashMap<NodeId, Margins>,
    order: Vec<NodeId>,
    token: Option<DocumentToken>,
    image_count: usize,
    image_latency: u32,
    polls: u32,
    failing_images: bool,
}

impl FlowGeometry {
    /// Create a geometry for a viewport.
    pub fn new(viewport: Size) -> Self {
        Self {
            viewport,
            scroll: [0.0, 0.0],
            extent: [viewport.width, viewport.height],
            boxes: HashMap::new(),
            margins: HashMap::new(),
            order: Vec::new(),
            token: None,
            image_count: 0,
            image_latency: 0,
            polls: 0,
            failing_images: false,
        }
    }

    /// Images report as pending for this many polls after a new document.
    pub fn with_image_latency(mut self, polls: u32) -> Self {
        self.image_latency = polls;
        self
    }

    /// Images settle as errored instead of loaded.
    pub fn with_failing_images(mut self) -> Self {
        self.failing_images = true;
        self
    }

    /// Change the viewport size. Callers re-run layout afterwards.
    pub fn resize(&mut self, viewport: Size) {
        self.viewport = viewport;
        self.clamp_scroll();
    }

    /// Current scroll offset along an axis.
    pub fn scroll_offset(&self, axis: Axis) -> f64 {
        self.scroll[axis_index(axis)]
    }

    /// Box of a node in document coordinates.
    pub fn document_box(&self, node: NodeId) -> Option<Rect> {
        self.boxes.get(&node).copied()
    }

    fn clamp_scroll(&mut self) {
        for axis in [Axis::X, Axis::Y] {
            let i = axis_index(axis);
            let max = (self.extent[i] - self.viewport.along(axis)).max(0.0);
            self.scroll[i] = self.scroll[i].clamp(0.0, max);
        }
    }
}

fn axis_index(axis: Axis) -> usize {
    match axis {
        Axis::X => 0,
        Axis::Y => 1,
    }
}

impl DocumentGeometry for FlowGeometry {
    fn viewport(&self) -> Size {
        self.viewport
    }

    fn metrics(&self, axis: Axis) -> ViewportMetrics {
        ViewportMetrics {
            width: self.viewport.width,
            height: self.viewport.height,
            scroll_offset: self.scroll[axis_index(axis)],
            scroll_extent: self.extent[axis_index(axis)],
        }
    }

    fn bounding_box(&self, node: NodeId) -> Option<Rect> {
        self.boxes
            .get(&node)
            .map(|r| r.translate(-self.scroll[0], -self.scroll[1]))
    }

    fn computed_margin(&self, node: NodeId) -> Margins {
        self.margins.get(&node).copied().unwrap_or_default()
    }

    fn scroll_to(&mut self, offset: f64, axis: Axis) {
        self.scroll[axis_index(axis)] = offset;
        self.clamp_scroll();
    }

    fn query_intersecting(&self, area: Rect) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|n| self.bounding_box(*n).is_some_and(|r| r.intersects(&area)))
            .collect()
    }

    fn reflow(&mut self, doc: &ContentDocument, layout: &AppliedLayout) {
        if self.token != Some(doc.token()) {
            self.token = Some(doc.token());
            self.polls = 0;
            self.scroll = [0.0, 0.0];
        }
        self.image_count = doc.images().len();

        let mut flow = Flow::new(doc, layout, self.viewport);
        let root = doc.root();
        if let Some(rect) = flow.layout_block(root) {
            flow.boxes.insert(root, rect);
        }
        let (inline_extent, block_extent) = flow.extents();

        let vertical = layout.direction == WritingDirection::Vertical;
        let to_physical = |r: Rect| {
            if vertical {
                Rect::new(r.y, r.x, r.height, r.width)
            } else {
                r
            }
        };

        self.boxes = flow
            .boxes
            .into_iter()
            .map(|(n, r)| (n, to_physical(r)))
            .collect();
        self.margins = flow.margins;
        self.order = doc
            .descendants(root)
            .into_iter()
            .filter(|n| self.boxes.contains_key(n))
            .collect();
        self.extent = if vertical {
            [block_extent, inline_extent]
        } else {
            [inline_extent, block_extent]
        };
        self.clamp_scroll();

        tracing::trace!(
            boxes = self.boxes.len(),
            extent_x = self.extent[0],
            extent_y = self.extent[1],
            "Reflowed document"
        );
    }

    fn poll_images(&mut self) -> ImageLoadState {
        let settled = self.polls >= self.image_latency;
        self.polls = self.polls.saturating_add(1);
        let done = if settled { self.image_count } else { 0 };
        ImageLoadState {
            total: self.image_count,
            loaded: if self.failing_images { 0 } else { done },
            errored: if self.failing_images { done } else { 0 },
        }
    }
}

/// One line box or image inside a paragraph.
#[derive(Debug, Clone, Copy)]
struct Item {
    inline: f64,
    block: f64,
    image: bool,
}

/// Layout state for one pass.
struct Flow<'a> {
    doc: &'a ContentDocument,
    layout: &'a AppliedLayout,
    line: f64,
    advance: f64,
    paragraph_gap: f64,
    columns_per_page: u32,
    page_inline: f64,
    column_inline: f64,
    column_block: f64,
    viewport_block: f64,
    column: u32,
    cursor: f64,
    used: bool,
    max_block: f64,
    boxes: HashMap<NodeId, Rect>,
    margins: HashMap<NodeId, Margins>,
}

impl<'a> Flow<'a> {
    fn new(doc: &'a ContentDocument, layout: &'a AppliedLayout, viewport: Size) -> Self {
        let (page_inline, viewport_block) = match layout.direction {
            WritingDirection::Horizontal => (viewport.width, viewport.height),
            WritingDirection::Vertical => (viewport.height, viewport.width),
        };
        let columns_per_page = layout.mode.columns_per_page();
        let margins = layout.margin_total();
        let column_inline = if layout.mode.is_columnar() {
            let gaps = f64::from(columns_per_page - 1) * layout.column_gap;
            (page_inline - margins - gaps) / f64::from(columns_per_page)
        } else {
            page_inline - margins
        }
        .max(1.0);
        let column_block = if layout.mode.is_columnar() {
            viewport_block
        } else {
            f64::INFINITY
        };
        let line = (layout.font_size_px * layout.line_height).max(1.0);

        Self {
            doc,
            layout,
            line,
            advance: (layout.font_size_px * CHAR_ADVANCE_EM).max(0.1),
            paragraph_gap: line / 2.0,
            columns_per_page,
            page_inline,
            column_inline,
            column_block,
            viewport_block,
            column: 0,
            cursor: 0.0,
            used: false,
            max_block: 0.0,
            boxes: HashMap::new(),
            margins: HashMap::new(),
        }
    }

    fn columnar(&self) -> bool {
        self.layout.mode.is_columnar()
    }

    fn column_start(&self, column: u32) -> f64 {
        if !self.columnar() {
            return self.layout.margin_left_px;
        }
        let page = column / self.columns_per_page;
        let index = column % self.columns_per_page;
        f64::from(page) * self.page_inline
            + self.layout.margin_left_px
            + f64::from(index) * (self.column_inline + self.layout.column_gap)
    }

    fn break_column(&mut self) {
        if self.columnar() && self.used {
            self.column += 1;
            self.cursor = 0.0;
            self.used = false;
        }
    }

    /// Reserve `size` along the block axis, moving to the next column when
    /// the current one is full.
    fn place(&mut self, size: f64) -> (u32, f64) {
        if self.columnar() && self.used && self.cursor + size > self.column_block + EPSILON {
            self.column += 1;
            self.cursor = 0.0;
        }
        let at = (self.column, self.cursor);
        self.cursor += size;
        self.used = true;
        self.max_block = self.max_block.max(self.cursor);
        at
    }

    fn extents(&self) -> (f64, f64) {
        if self.columnar() {
            let end = self.column_start(self.column) + self.column_inline + self.layout.margin_right_px;
            (end.max(self.page_inline), self.viewport_block)
        } else {
            (self.page_inline, self.max_block.max(self.viewport_block))
        }
    }

    fn is_block(&self, node: NodeId) -> bool {
        self.doc.element(node).is_some() && self.doc.display(node) == Display::Block
    }

    fn layout_block(&mut self, node: NodeId) -> Option<Rect> {
        if self.doc.display(node) == Display::None {
            return None;
        }

        if self.doc.has_class(node, FILLER_CLASS) {
            self.break_column();
            let (column, _) = self.place(0.0);
            let block = if self.columnar() { self.column_block } else { 0.0 };
            self.cursor = block;
            let rect = Rect::new(self.column_start(column), 0.0, self.column_inline, block);
            self.boxes.insert(node, rect);
            return Some(rect);
        }

        if self.columnar()
            && matches!(
                self.doc.style(node, "break-before"),
                Some("column") | Some("page")
            )
        {
            self.break_column();
        }

        let children = self.doc.children(node).to_vec();
        let rect = if children.iter().any(|c| self.is_block(*c)) {
            let mut union: Option<Rect> = None;
            let mut run: Vec<NodeId> = Vec::new();
            for child in children {
                if self.is_block(child) {
                    if !run.is_empty() {
                        let inline_run = std::mem::take(&mut run);
                        union = merge(union, self.layout_paragraph(&inline_run));
                    }
                    union = merge(union, self.layout_block(child));
                } else {
                    run.push(child);
                }
            }
            if !run.is_empty() {
                union = merge(union, self.layout_paragraph(&run));
            }
            union
        } else {
            let rect = self.layout_paragraph(&children);
            if rect.is_some() {
                self.margins.insert(
                    node,
                    Margins {
                        bottom: self.paragraph_gap,
                        ..Margins::default()
                    },
                );
            }
            rect
        };

        let rect = rect.unwrap_or_else(|| {
            Rect::new(self.column_start(self.column), self.cursor, self.column_inline, 0.0)
        });
        self.boxes.insert(node, rect);
        Some(rect)
    }

    /// Lay out a run of inline content as one paragraph.
    fn layout_paragraph(&mut self, nodes: &[NodeId]) -> Option<Rect> {
        let mut builder = ParagraphBuilder {
            doc: self.doc,
            chars_per_line: ((self.column_inline / self.advance).floor() as usize).max(1),
            line: self.line,
            column_inline: self.column_inline,
            column_block: self.column_block,
            vertical: self.layout.direction == WritingDirection::Vertical,
            items: Vec::new(),
            line_chars: 0,
            ranges: Vec::new(),
        };
        for node in nodes {
            builder.collect(*node);
        }
        if builder.items.is_empty() {
            return None;
        }

        let mut rects = Vec::with_capacity(builder.items.len());
        for item in &builder.items {
            let (column, block) = self.place(item.block);
            let offset = if item.image && self.layout.single_image {
                ((self.column_inline - item.inline) / 2.0).max(0.0)
            } else {
                0.0
            };
            let inline = if item.image { item.inline } else { self.column_inline };
            rects.push(Rect::new(
                self.column_start(column) + offset,
                block,
                inline,
                item.block,
            ));
        }

        for (node, first, last) in &builder.ranges {
            let rect = rects[*first..=*last]
                .iter()
                .skip(1)
                .fold(rects[*first], |acc, r| acc.union(r));
            self.boxes.insert(*node, rect);
        }

        self.cursor += self.paragraph_gap;
        self.max_block = self.max_block.max(self.cursor);

        rects.iter().skip(1).fold(Some(rects[0]), |acc, r| merge(acc, Some(*r)))
    }
}

fn merge(a: Option<Rect>, b: Option<Rect>) -> Option<Rect> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Collects line items for a paragraph and remembers which items every
/// inline element spans.
struct ParagraphBuilder<'a> {
    doc: &'a ContentDocument,
    chars_per_line: usize,
    line: f64,
    column_inline: f64,
    column_block: f64,
    vertical: bool,
    items: Vec<Item>,
    line_chars: usize,
    ranges: Vec<(NodeId, usize, usize)>,
}

impl ParagraphBuilder<'_> {
    fn collect(&mut self, node: NodeId) -> Option<(usize, usize)> {
        let doc = self.doc;
        match &doc.node(node).data {
            NodeData::Text(text) => self.push_text(collapsed_len(text)),
            NodeData::Element(element) => {
                if doc.display(node) == Display::None {
                    return None;
                }
                let span = match element.tag.as_str() {
                    "img" | "svg" | "image" => {
                        self.line_chars = 0;
                        let item = self.image_item(node);
                        self.items.push(item);
                        let index = self.items.len() - 1;
                        Some((index, index))
                    }
                    "br" => {
                        self.line_chars = 0;
                        None
                    }
                    _ => {
                        doc.children(node)
                            .iter()
                            .filter_map(|c| self.collect(*c))
                            .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)))
                    }
                };
                if let Some((first, last)) = span {
                    self.ranges.push((node, first, last));
                }
                span
            }
        }
    }

    fn push_text(&mut self, mut chars: usize) -> Option<(usize, usize)> {
        if chars == 0 {
            return None;
        }
        let mut first = None;
        while chars > 0 {
            if self.line_chars == 0 {
                self.items.push(Item {
                    inline: self.column_inline,
                    block: self.line,
                    image: false,
                });
            }
            first.get_or_insert(self.items.len() - 1);
            let take = chars.min(self.chars_per_line - self.line_chars);
            self.line_chars += take;
            chars -= take;
            if self.line_chars >= self.chars_per_line {
                self.line_chars = 0;
            }
        }
        first.map(|f| (f, self.items.len() - 1))
    }

    fn image_item(&self, node: NodeId) -> Item {
        let width = dimension(self.doc, node, "width").unwrap_or(DEFAULT_IMAGE.0);
        let height = dimension(self.doc, node, "height").unwrap_or(DEFAULT_IMAGE.1);
        let (inline, block) = if self.vertical {
            (height, width)
        } else {
            (width, height)
        };

        let mut scale = 1.0_f64;
        if inline > self.column_inline {
            scale = self.column_inline / inline;
        }
        if self.column_block.is_finite() && block * scale > self.column_block {
            scale = self.column_block / block;
        }
        Item {
            inline: inline * scale,
            block: block * scale,
            image: true,
        }
    }
}

/// Pixel dimension from an attribute or the inline style.
fn dimension(doc: &ContentDocument, node: NodeId, name: &str) -> Option<f64> {
    doc.style(node, name)
        .or_else(|| doc.attr(node, name))
        .and_then(|v| v.trim().trim_end_matches("px").parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Character count with whitespace runs collapsed to one.
fn collapsed_len(text: &str) -> usize {
    let mut count = 0;
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                count += 1;
            }
            in_space = true;
        } else {
            count += 1;
            in_space = false;
        }
    }
    count
}
