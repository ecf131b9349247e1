//! Rendering-environment abstraction.
//!
//! All bounding-box queries, scrolling and reflow go through
//! [`DocumentGeometry`], so the locator and pagination math never talk to a
//! real renderer directly. [`FlowGeometry`] is a headless implementation used
//! by the CLI and the test-suite.

use crate::document::{ContentDocument, NodeId};
use crate::layout::AppliedLayout;
use serde::Serialize;

mod flow;

pub use flow::FlowGeometry;

/// Scroll or layout axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Horizontal axis.
    X,
    /// Vertical axis.
    Y,
}

/// Width and height in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Size {
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Size {
    /// Create a size.
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Extent along an axis.
    pub fn along(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.width,
            Axis::Y => self.height,
        }
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Rect {
    /// Create a rectangle.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Leading edge along an axis.
    pub fn start(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// Whether two rectangles overlap with a non-zero area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Shift by a delta.
    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Computed box margins of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Margins {
    /// Top margin.
    pub top: f64,
    /// Right margin.
    pub right: f64,
    /// Bottom margin.
    pub bottom: f64,
    /// Left margin.
    pub left: f64,
}

impl Margins {
    /// Margin before the box along `axis`.
    pub fn leading(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.left,
            Axis::Y => self.top,
        }
    }
}

/// Viewport size plus the scroll position along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ViewportMetrics {
    /// Viewport width.
    pub width: f64,
    /// Viewport height.
    pub height: f64,
    /// Current scroll offset along the queried axis.
    pub scroll_offset: f64,
    /// Total scrollable extent along the queried axis.
    pub scroll_extent: f64,
}

impl ViewportMetrics {
    /// Viewport extent along an axis.
    pub fn viewport_along(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.width,
            Axis::Y => self.height,
        }
    }
}

/// Progress of image loads on the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageLoadState {
    /// Number of images in the document.
    pub total: usize,
    /// Images that finished loading.
    pub loaded: usize,
    /// Images that failed to load.
    pub errored: usize,
}

impl ImageLoadState {
    /// Whether every image either loaded or errored.
    pub fn is_settled(&self) -> bool {
        self.loaded + self.errored >= self.total
    }
}

/// Geometry queries against the rendering environment.
///
/// Bounding boxes are viewport-relative, like a browser's client rects.
pub trait DocumentGeometry {
    /// Current viewport size.
    fn viewport(&self) -> Size;

    /// Viewport metrics with scroll offset and extent along `axis`.
    fn metrics(&self, axis: Axis) -> ViewportMetrics;

    /// Viewport-relative bounding box of a node, `None` if it has no box.
    fn bounding_box(&self, node: NodeId) -> Option<Rect>;

    /// Computed margins of a node.
    fn computed_margin(&self, node: NodeId) -> Margins;

    /// Scroll to an absolute offset along `axis`.
    fn scroll_to(&mut self, offset: f64, axis: Axis);

    /// Nodes whose box intersects the given viewport-relative rectangle.
    fn query_intersecting(&self, area: Rect) -> Vec<NodeId>;

    /// Recompute all boxes after the document or its styles changed.
    fn reflow(&mut self, doc: &ContentDocument, layout: &AppliedLayout);

    /// Report image load progress. Called repeatedly until settled.
    fn poll_images(&mut self) -> ImageLoadState;
}
