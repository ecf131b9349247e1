//! Layout modes, reader styles and the layout coordinator.
//!
//! The coordinator writes document-level and per-element styles into the
//! [`ContentDocument`], converts relative margins to pixels under column
//! layouts, derives column geometry and keeps the DoubleColumn filler node in
//! sync. The result is an [`AppliedLayout`] context that the geometry
//! provider, the pager and the locator read from.

use crate::document::{ContentDocument, DocumentToken, NodeId, STYLE_TAGS};
use crate::geometry::{Axis, DocumentGeometry, Size};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class marking nodes the locator must never report.
pub const NO_OBSERVE_CLASS: &str = "no-observe";

/// Class of the DoubleColumn filler node.
pub const FILLER_CLASS: &str = "reader-filler";

/// Browser default font size the percentage font setting scales.
const BASE_FONT_PX: f64 = 16.0;

/// How content is laid out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutMode {
    /// One long scrollable flow, no virtual pages.
    #[default]
    Continuous,
    /// One column per virtual page.
    SingleColumn,
    /// Two columns per virtual page.
    DoubleColumn,
}

impl LayoutMode {
    /// Whether content is split into columns (and so into virtual pages).
    pub fn is_columnar(&self) -> bool {
        !matches!(self, LayoutMode::Continuous)
    }

    /// Number of columns visible on one virtual page.
    pub fn columns_per_page(&self) -> u32 {
        match self {
            LayoutMode::DoubleColumn => 2,
            _ => 1,
        }
    }

    fn column_divisor(&self) -> Option<f64> {
        match self {
            LayoutMode::Continuous => None,
            LayoutMode::SingleColumn => Some(2.0),
            LayoutMode::DoubleColumn => Some(4.0),
        }
    }
}

/// Direction lines of text run in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum WritingDirection {
    /// Horizontal lines, blocks stacked top to bottom.
    #[default]
    Horizontal,
    /// Vertical lines, blocks stacked across.
    Vertical,
}

/// Axis virtual pages are measured along.
pub fn paging_axis(direction: WritingDirection) -> Axis {
    match direction {
        WritingDirection::Horizontal => Axis::X,
        WritingDirection::Vertical => Axis::Y,
    }
}

/// Axis the reader scrolls along.
///
/// Continuous layouts scroll along the block axis; column layouts scroll
/// along the axis columns progress on, which is the paging axis.
pub fn scroll_axis(mode: LayoutMode, direction: WritingDirection) -> Axis {
    match (mode, direction) {
        (LayoutMode::Continuous, WritingDirection::Horizontal) => Axis::Y,
        (LayoutMode::Continuous, WritingDirection::Vertical) => Axis::X,
        (_, direction) => paging_axis(direction),
    }
}

/// CSS length used for margins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CssLength {
    /// Absolute pixels.
    Px(f64),
    /// Percentage of the viewport width.
    Percent(f64),
    /// Viewport-width units.
    Vw(f64),
}

impl CssLength {
    /// Whether the value depends on the viewport size.
    pub fn is_relative(&self) -> bool {
        !matches!(self, CssLength::Px(_))
    }

    /// Resolve to pixels against a viewport width.
    pub fn to_px(&self, viewport_width: f64) -> f64 {
        match *self {
            CssLength::Px(v) => v,
            CssLength::Percent(v) | CssLength::Vw(v) => viewport_width * v / 100.0,
        }
    }
}

impl fmt::Display for CssLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CssLength::Px(v) => write!(f, "{}px", v),
            CssLength::Percent(v) => write!(f, "{}%", v),
            CssLength::Vw(v) => write!(f, "{}vw", v),
        }
    }
}

impl FromStr for CssLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (number, ctor): (&str, fn(f64) -> CssLength) = if let Some(n) = s.strip_suffix("px") {
            (n, CssLength::Px)
        } else if let Some(n) = s.strip_suffix("vw") {
            (n, CssLength::Vw)
        } else if let Some(n) = s.strip_suffix('%') {
            (n, CssLength::Percent)
        } else {
            (s, CssLength::Px)
        };
        number
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(ctor)
            .ok_or_else(|| format!("Invalid CSS length: {}", s))
    }
}

impl TryFrom<String> for CssLength {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CssLength> for String {
    fn from(value: CssLength) -> Self {
        value.to_string()
    }
}

/// Typography and margin settings chosen by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderStyle {
    /// Left page margin.
    #[serde(default = "default_margin")]
    pub margin_left: CssLength,
    /// Right page margin.
    #[serde(default = "default_margin")]
    pub margin_right: CssLength,
    /// Font size as a percentage of the base size.
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    /// Line height as a percentage of the font size.
    #[serde(default = "default_line_height")]
    pub line_height: u32,
    /// Font family, `default` keeps the book's own.
    #[serde(default = "default_font_family")]
    pub font_family: String,
}

impl Default for ReaderStyle {
    fn default() -> Self {
        Self {
            margin_left: default_margin(),
            margin_right: default_margin(),
            font_size: default_font_size(),
            line_height: default_line_height(),
            font_family: default_font_family(),
        }
    }
}

fn default_margin() -> CssLength {
    CssLength::Vw(5.0)
}

fn default_font_size() -> u32 {
    100
}

fn default_line_height() -> u32 {
    140
}

fn default_font_family() -> String {
    "default".to_string()
}

/// Everything the style provider can change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReaderSettings {
    /// Typography and margins.
    #[serde(default)]
    pub style: ReaderStyle,
    /// Layout mode.
    #[serde(default)]
    pub layout_mode: LayoutMode,
    /// Writing direction.
    #[serde(default)]
    pub writing_direction: WritingDirection,
}

/// Geometry context produced by one layout pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedLayout {
    /// Layout mode.
    pub mode: LayoutMode,
    /// Writing direction.
    pub direction: WritingDirection,
    /// Viewport the layout was computed for.
    pub viewport: Size,
    /// Left margin in pixels.
    pub margin_left_px: f64,
    /// Right margin in pixels.
    pub margin_right_px: f64,
    /// Resolved font size in pixels.
    pub font_size_px: f64,
    /// Line height multiplier.
    pub line_height: f64,
    /// Font family, `None` to keep the book's.
    pub font_family: Option<String>,
    /// Column width, for column layouts.
    pub column_width: Option<f64>,
    /// Column height, for column layouts.
    pub column_height: Option<f64>,
    /// Gap between columns.
    pub column_gap: f64,
    /// Page consists of a single image and no text.
    pub single_image: bool,
    /// A DoubleColumn filler node was appended.
    pub has_filler: bool,
}

impl AppliedLayout {
    /// Plain layout used before any style is applied.
    pub fn unstyled(viewport: Size) -> Self {
        Self {
            mode: LayoutMode::Continuous,
            direction: WritingDirection::Horizontal,
            viewport,
            margin_left_px: 0.0,
            margin_right_px: 0.0,
            font_size_px: BASE_FONT_PX,
            line_height: 1.4,
            font_family: None,
            column_width: None,
            column_height: None,
            column_gap: 0.0,
            single_image: false,
            has_filler: false,
        }
    }

    /// Axis the reader scrolls along.
    pub fn scroll_axis(&self) -> Axis {
        scroll_axis(self.mode, self.direction)
    }

    /// Axis virtual pages are measured along.
    pub fn paging_axis(&self) -> Axis {
        paging_axis(self.direction)
    }

    /// Size of one virtual page in pixels.
    pub fn page_size(&self) -> f64 {
        self.viewport.along(self.paging_axis())
    }

    /// Sum of the horizontal margins.
    pub fn margin_total(&self) -> f64 {
        self.margin_left_px + self.margin_right_px
    }
}

/// Style values the coordinator replaced, so the next pass can put the
/// book's own values back before writing its own.
#[derive(Debug, Default)]
struct StyleOverrides {
    token: Option<DocumentToken>,
    saved: Vec<(NodeId, &'static str, Option<String>)>,
}

impl StyleOverrides {
    fn restore(&mut self, doc: &mut ContentDocument) {
        let saved = std::mem::take(&mut self.saved);
        if self.token == Some(doc.token()) {
            for (node, property, original) in saved {
                match original {
                    Some(value) => doc.set_style(node, property, value),
                    None => doc.remove_style(node, property),
                }
            }
        }
        self.token = Some(doc.token());
    }

    fn set(
        &mut self,
        doc: &mut ContentDocument,
        node: NodeId,
        property: &'static str,
        value: impl Into<String>,
    ) {
        let original = doc.style(node, property).map(str::to_string);
        self.saved.push((node, property, original));
        doc.set_style(node, property, value);
    }
}

/// Applies reader settings to documents and tracks the filler node.
#[derive(Debug, Default)]
pub struct LayoutCoordinator {
    filler: Option<(DocumentToken, NodeId)>,
    overrides: StyleOverrides,
    applied: Option<AppliedLayout>,
}

impl LayoutCoordinator {
    /// Create a coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last applied layout.
    pub fn current(&self) -> Option<&AppliedLayout> {
        self.applied.as_ref()
    }

    /// Apply `settings` to `doc` and reflow the geometry.
    pub fn apply<G: DocumentGeometry>(
        &mut self,
        doc: &mut ContentDocument,
        geometry: &mut G,
        settings: &ReaderSettings,
    ) -> AppliedLayout {
        self.detach_filler(doc);
        self.overrides.restore(doc);

        let viewport = geometry.viewport();
        let mode = settings.layout_mode;
        let direction = settings.writing_direction;
        let style = &settings.style;

        let margin_left_px = style.margin_left.to_px(viewport.width);
        let margin_right_px = style.margin_right.to_px(viewport.width);
        let margin_total = margin_left_px + margin_right_px;

        let (column_width, column_height) = match mode.column_divisor() {
            None => (None, None),
            Some(divisor) => {
                let base = viewport.along(paging_axis(direction));
                let column = ((base - margin_total) / divisor).max(0.0);
                match direction {
                    WritingDirection::Horizontal => (Some(column), Some(viewport.height)),
                    WritingDirection::Vertical => (Some(viewport.width), Some(column)),
                }
            }
        };

        let root = doc.root();
        let single_image = !doc.has_text(root) && doc.images().len() == 1;

        let mut applied = AppliedLayout {
            mode,
            direction,
            viewport,
            margin_left_px,
            margin_right_px,
            font_size_px: BASE_FONT_PX * f64::from(style.font_size) / 100.0,
            line_height: f64::from(style.line_height) / 100.0,
            font_family: (style.font_family != "default").then(|| style.font_family.clone()),
            column_width,
            column_height,
            column_gap: if mode.is_columnar() { margin_total } else { 0.0 },
            single_image,
            has_filler: false,
        };

        Self::apply_document_styles(&mut self.overrides, doc, &applied, style);
        Self::apply_element_styles(&mut self.overrides, doc, &applied);
        geometry.reflow(doc, &applied);

        if mode == LayoutMode::DoubleColumn && !single_image && self.needs_filler(geometry, &applied) {
            self.attach_filler(doc);
            applied.has_filler = true;
            geometry.reflow(doc, &applied);
        }

        tracing::debug!(
            mode = ?mode,
            direction = ?direction,
            margin_left = margin_left_px,
            margin_right = margin_right_px,
            column_width = ?applied.column_width,
            column_height = ?applied.column_height,
            filler = applied.has_filler,
            "Applied layout"
        );

        self.applied = Some(applied.clone());
        applied
    }

    fn detach_filler(&mut self, doc: &mut ContentDocument) {
        match self.filler {
            Some((token, filler)) if token == doc.token() => doc.detach(filler),
            Some(_) => self.filler = None,
            None => {}
        }
    }

    /// Append the filler, reusing the node from an earlier pass on this document.
    fn attach_filler(&mut self, doc: &mut ContentDocument) {
        let root = doc.root();
        match self.filler {
            Some((token, filler)) if token == doc.token() => doc.attach(root, filler),
            _ => {
                let filler = doc.append_element(
                    root,
                    "div",
                    &[
                        ("class", "reader-filler no-observe"),
                        ("style", "break-before: column; height: 100%"),
                    ],
                );
                self.filler = Some((doc.token(), filler));
            }
        }
    }

    /// Whether the last virtual page holds at most one column of content.
    fn needs_filler<G: DocumentGeometry>(&self, geometry: &G, applied: &AppliedLayout) -> bool {
        let page = applied.page_size();
        if page <= 0.0 {
            return false;
        }
        let extent = geometry.metrics(applied.paging_axis()).scroll_extent;
        let remainder = extent % page;
        remainder > 0.5 && remainder <= page / 2.0
    }

    fn apply_document_styles(
        overrides: &mut StyleOverrides,
        doc: &mut ContentDocument,
        applied: &AppliedLayout,
        style: &ReaderStyle,
    ) {
        let root = doc.root();

        // Relative margins must be pinned to pixels or text bleeds across
        // column boundaries while paging.
        let (left, right) = if applied.mode.is_columnar() {
            (
                format!("{}px", applied.margin_left_px),
                format!("{}px", applied.margin_right_px),
            )
        } else {
            (style.margin_left.to_string(), style.margin_right.to_string())
        };
        overrides.set(doc, root, "margin-left", left);
        overrides.set(doc, root, "margin-right", right);
        overrides.set(doc, root, "font-size", format!("{}%", style.font_size));
        overrides.set(
            doc,
            root,
            "writing-mode",
            match applied.direction {
                WritingDirection::Horizontal => "horizontal-tb",
                WritingDirection::Vertical => "vertical-rl",
            },
        );

        if let (Some(width), Some(height)) = (applied.column_width, applied.column_height) {
            let column = match applied.direction {
                WritingDirection::Horizontal => width,
                WritingDirection::Vertical => height,
            };
            overrides.set(doc, root, "column-width", format!("{}px", column));
            overrides.set(doc, root, "column-gap", format!("{}px", applied.column_gap));
            overrides.set(doc, root, "column-fill", "auto");
            overrides.set(doc, root, "width", format!("{}px", width));
            overrides.set(doc, root, "height", format!("{}px", height));
        }
    }

    fn apply_element_styles(
        overrides: &mut StyleOverrides,
        doc: &mut ContentDocument,
        applied: &AppliedLayout,
    ) {
        let root = doc.root();
        let children: Vec<NodeId> = doc
            .element_children(root)
            .filter(|c| doc.tag(*c).is_some_and(|t| !STYLE_TAGS.contains(&t)))
            .collect();

        for child in children {
            overrides.set(doc, child, "line-height", format!("{}", applied.line_height));
            if let Some(family) = &applied.font_family {
                overrides.set(doc, child, "font-family", family.clone());
            }
            if applied.single_image && applied.mode.is_columnar() {
                overrides.set(doc, child, "text-align", "center");
            }
        }
    }
}
