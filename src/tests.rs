use crate::backend::{
    ChapterCatalog, ChapterId, ChapterInfo, ImageBookmark, ImageBookmarkRequest, LocalBackend,
    ProgressUpdate, ReaderBackend, ReadingContext, SavedProgress,
};
use crate::config::Config;
use crate::document::{ContentDocument, Display};
use crate::error::{ReaderError, Result};
use crate::geometry::{
    Axis, DocumentGeometry, FlowGeometry, ImageLoadState, Margins, Rect, Size, ViewportMetrics,
};
use crate::layout::{
    AppliedLayout, CssLength, FILLER_CLASS, LayoutCoordinator, LayoutMode, ReaderSettings,
    ReaderStyle, WritingDirection,
};
use crate::locator::{self, PositionLocator};
use crate::navigation::{Direction, NavigationStack, PrefetchTracker};
use crate::overlay::{OverlayConfig, OverlayInjector};
use crate::pager::{self, PageState};
use crate::scroll::{
    ScrollDebouncer, ScrollOutcome, ScrollPolicy, ScrollRequest, ScrollScheduler, ScrollTarget,
};
use crate::session::{ReaderEvent, ReaderInput, ReaderSession, SessionOptions, ToastLevel};
use crate::store::{Database, ImageBookmarkRecord, ProgressRecord, now_timestamp};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn viewport() -> Size {
    Size::new(1000.0, 800.0)
}

fn settings(mode: LayoutMode, direction: WritingDirection) -> ReaderSettings {
    ReaderSettings {
        style: ReaderStyle {
            margin_left: CssLength::Px(0.0),
            margin_right: CssLength::Px(0.0),
            ..ReaderStyle::default()
        },
        layout_mode: mode,
        writing_direction: direction,
    }
}

fn paragraphs(count: usize) -> String {
    (1..=count)
        .map(|i| format!("<p>Paragraph number {}</p>", i))
        .collect()
}

fn laid_out(markup: &str, settings: &ReaderSettings) -> (ContentDocument, FlowGeometry, AppliedLayout) {
    let mut doc = ContentDocument::parse(markup, 0).unwrap();
    let mut geometry = FlowGeometry::new(viewport());
    let layout = LayoutCoordinator::new().apply(&mut doc, &mut geometry, settings);
    (doc, geometry, layout)
}

fn metrics(offset: f64, extent: f64) -> ViewportMetrics {
    ViewportMetrics {
        width: 1000.0,
        height: 800.0,
        scroll_offset: offset,
        scroll_extent: extent,
    }
}

fn context(chapter: i64) -> ReadingContext {
    ReadingContext {
        library_id: 1,
        series_id: 1,
        volume_id: 1,
        chapter_id: ChapterId(chapter),
        reading_list_id: None,
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<ReaderEvent>) -> Vec<ReaderEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// In-memory backend that records which lookups were made.
#[derive(Default)]
struct MemoryBackend {
    chapters: Vec<Vec<String>>,
    progress: Mutex<Vec<ProgressUpdate>>,
    bookmarks: Mutex<Vec<ImageBookmark>>,
    next_calls: Mutex<Vec<ChapterId>>,
    prev_calls: Mutex<Vec<ChapterId>>,
    fail_content: bool,
    fail_bookmarks: bool,
}

impl MemoryBackend {
    fn with_chapters(chapters: Vec<Vec<String>>) -> Self {
        Self {
            chapters,
            ..Self::default()
        }
    }

    fn index(&self, chapter: ChapterId) -> Option<usize> {
        let index = usize::try_from(chapter.0 - 1).ok()?;
        (index < self.chapters.len()).then_some(index)
    }
}

impl ReaderBackend for MemoryBackend {
    async fn chapter_content(&self, chapter: ChapterId, page: u32) -> Result<String> {
        if self.fail_content {
            return Err(ReaderError::Backend("content service offline".to_string()));
        }
        self.index(chapter)
            .and_then(|i| self.chapters[i].get(page as usize).cloned())
            .ok_or_else(|| ReaderError::NotFound(format!("page {}", page)))
    }

    async fn chapter_info(&self, chapter: ChapterId) -> Result<Option<ChapterInfo>> {
        Ok(self.index(chapter).map(|i| ChapterInfo {
            pages: self.chapters[i].len() as u32,
            volume_id: 1,
            title: Some(format!("Chapter {}", chapter)),
        }))
    }

    async fn next_chapter(
        &self,
        _series_id: i64,
        _volume_id: i64,
        chapter: ChapterId,
        _reading_list_id: Option<i64>,
    ) -> Result<Option<ChapterId>> {
        self.next_calls.lock().push(chapter);
        let next = ChapterId(chapter.0 + 1);
        Ok(self.index(next).map(|_| next))
    }

    async fn prev_chapter(
        &self,
        _series_id: i64,
        _volume_id: i64,
        chapter: ChapterId,
        _reading_list_id: Option<i64>,
    ) -> Result<Option<ChapterId>> {
        self.prev_calls.lock().push(chapter);
        let prev = ChapterId(chapter.0 - 1);
        Ok(self.index(prev).map(|_| prev))
    }

    async fn save_progress(&self, update: &ProgressUpdate) -> Result<()> {
        self.progress.lock().push(update.clone());
        Ok(())
    }

    async fn get_progress(&self, _chapter: ChapterId) -> Result<Option<SavedProgress>> {
        Ok(None)
    }

    async fn bookmarks(&self, _chapter: ChapterId) -> Result<Vec<ImageBookmark>> {
        Ok(self.bookmarks.lock().clone())
    }

    async fn bookmark(&self, request: &ImageBookmarkRequest) -> Result<()> {
        if self.fail_bookmarks {
            return Err(ReaderError::Backend("bookmark service offline".to_string()));
        }
        self.bookmarks.lock().push(ImageBookmark {
            page: request.page,
            inline_element_index: request.inline_element_index,
        });
        Ok(())
    }

    async fn unbookmark(&self, request: &ImageBookmarkRequest) -> Result<()> {
        if self.fail_bookmarks {
            return Err(ReaderError::Backend("bookmark service offline".to_string()));
        }
        self.bookmarks
            .lock()
            .retain(|b| !(b.page == request.page && b.inline_element_index == request.inline_element_index));
        Ok(())
    }
}

/// Geometry whose scroll position never moves.
struct StuckGeometry;

impl DocumentGeometry for StuckGeometry {
    fn viewport(&self) -> Size {
        viewport()
    }

    fn metrics(&self, _axis: Axis) -> ViewportMetrics {
        metrics(0.0, 5000.0)
    }

    fn bounding_box(&self, _node: crate::document::NodeId) -> Option<Rect> {
        None
    }

    fn computed_margin(&self, _node: crate::document::NodeId) -> Margins {
        Margins::default()
    }

    fn scroll_to(&mut self, _offset: f64, _axis: Axis) {}

    fn query_intersecting(&self, _area: Rect) -> Vec<crate::document::NodeId> {
        Vec::new()
    }

    fn reflow(&mut self, _doc: &ContentDocument, _layout: &AppliedLayout) {}

    fn poll_images(&mut self) -> ImageLoadState {
        ImageLoadState::default()
    }
}

/// Flow geometry that reports a fixed top margin and logs the calls it sees.
struct RecordingGeometry {
    inner: FlowGeometry,
    top_margin: f64,
    calls: Mutex<Vec<String>>,
}

impl RecordingGeometry {
    fn new(top_margin: f64) -> Self {
        Self {
            inner: FlowGeometry::new(viewport()),
            top_margin,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl DocumentGeometry for RecordingGeometry {
    fn viewport(&self) -> Size {
        self.inner.viewport()
    }

    fn metrics(&self, axis: Axis) -> ViewportMetrics {
        self.log(format!("metrics {:?}", axis));
        self.inner.metrics(axis)
    }

    fn bounding_box(&self, node: crate::document::NodeId) -> Option<Rect> {
        self.inner.bounding_box(node)
    }

    fn computed_margin(&self, node: crate::document::NodeId) -> Margins {
        Margins {
            top: self.top_margin,
            ..self.inner.computed_margin(node)
        }
    }

    fn scroll_to(&mut self, offset: f64, axis: Axis) {
        self.log("scroll_to".to_string());
        self.inner.scroll_to(offset, axis);
    }

    fn query_intersecting(&self, area: Rect) -> Vec<crate::document::NodeId> {
        self.inner.query_intersecting(area)
    }

    fn reflow(&mut self, doc: &ContentDocument, layout: &AppliedLayout) {
        self.log("reflow".to_string());
        self.inner.reflow(doc, layout);
    }

    fn poll_images(&mut self) -> ImageLoadState {
        self.inner.poll_images()
    }
}

// ========== DOCUMENT ==========

#[test]
fn document_parse_fragment() {
    let doc = ContentDocument::parse("<p>Hello <em>there</em></p><div>Box</div>", 2).unwrap();
    let root = doc.root();
    assert_eq!(doc.tag(root), Some("body"));
    assert_eq!(doc.page(), 2);

    let children: Vec<_> = doc.element_children(root).collect();
    assert_eq!(children.len(), 2);
    assert_eq!(doc.text_content(children[0]), "Hello there");
    assert_eq!(doc.display(children[0]), Display::Block);

    let em = doc.element_children(children[0]).next().unwrap();
    assert_eq!(doc.display(em), Display::Inline);
}

#[test]
fn document_parse_full_xhtml_uses_body() {
    let markup = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
  <head><title>Chapter</title><style>p { color: red }</style></head>
  <body class="calibre"><h1 id="top">Title</h1><p>Text</p></body>
</html>"#;
    let doc = ContentDocument::parse(markup, 0).unwrap();
    assert_eq!(doc.tag(doc.root()), Some("body"));
    assert!(doc.has_class(doc.root(), "calibre"));
    assert_eq!(doc.element_children(doc.root()).count(), 2);
    assert_eq!(doc.find_by_id("top").and_then(|n| doc.tag(n)), Some("h1"));
}

#[test]
fn document_invalid_markup_is_an_error() {
    let result = ContentDocument::parse("<p>unclosed", 0);
    assert!(matches!(result, Err(ReaderError::InvalidMarkup(_))));
}

#[test]
fn document_tokens_are_unique() {
    let a = ContentDocument::empty(0);
    let b = ContentDocument::empty(0);
    assert_ne!(a.token(), b.token());
}

#[test]
fn document_parse_body_fragment_is_not_wrapped_twice() {
    let doc = ContentDocument::parse(r#"<body class="page"><p>One</p><p>Two</p></body>"#, 0).unwrap();
    assert!(doc.has_class(doc.root(), "page"));
    assert_eq!(doc.element_children(doc.root()).count(), 2);

    let second = doc.element_children(doc.root()).nth(1).unwrap();
    assert_eq!(PositionLocator::encode(&doc, second).as_str(), "//body/p[2]");
}

// ========== LOCATOR ==========

#[test]
fn locator_encode_scope_descope_resolve() {
    let doc =
        ContentDocument::parse("<div><p>One</p><p>Two</p></div><p>Three</p>", 3).unwrap();
    let div = doc.element_children(doc.root()).next().unwrap();
    let second = doc.element_children(div).nth(1).unwrap();

    let locator = PositionLocator::encode(&doc, second);
    assert_eq!(locator.as_str(), "//body/div[1]/p[2]");

    let scoped = locator.scope(3);
    assert_eq!(scoped.as_str(), "//section[@data-page=\"3\"]/div[1]/p[2]");
    assert_eq!(scoped.descope(), locator);
    assert_eq!(scoped.resolve(&doc), Some(second));
    assert_eq!(scoped.descope().resolve(&doc), Some(second));
}

#[test]
fn locator_id_root_passes_through_scope() {
    let doc = ContentDocument::parse("<div id=\"ch2\"><p>A</p><p>B</p></div>", 0).unwrap();
    let div = doc.find_by_id("ch2").unwrap();
    let p = doc.element_children(div).nth(1).unwrap();

    let locator = PositionLocator::encode(&doc, p);
    assert_eq!(locator.as_str(), "id(\"ch2\")/p[2]");
    assert_eq!(locator.scope(7).as_str(), locator.as_str());
    assert_eq!(locator.scope(7).descope(), locator);
    assert_eq!(locator.resolve(&doc), Some(p));
}

#[test]
fn locator_scoped_to_another_page_does_not_resolve() {
    let doc = ContentDocument::parse("<p>Only</p>", 1).unwrap();
    let locator = PositionLocator::parse("//body/p[1]").unwrap();
    assert!(locator.scope(1).resolve(&doc).is_some());
    assert!(locator.scope(2).resolve(&doc).is_none());
}

#[test]
fn locator_parse_validates_and_descopes() {
    assert!(PositionLocator::parse("p[1]").is_err());
    assert!(PositionLocator::parse("//body/p[0]").is_err());
    assert!(PositionLocator::parse("//body/p[x]").is_err());
    assert!(PositionLocator::parse("id(\"\")/p[1]").is_err());

    let parsed = PositionLocator::parse("//section[@data-page=\"4\"]/div[2]/p[1]").unwrap();
    assert_eq!(parsed.as_str(), "//body/div[2]/p[1]");

    let implicit = PositionLocator::parse("//body/div/p").unwrap();
    let doc = ContentDocument::parse("<div><p>x</p></div>", 0).unwrap();
    assert!(implicit.resolve(&doc).is_some());
}

#[test]
fn locator_missing_path_does_not_resolve() {
    let doc = ContentDocument::parse("<p>One</p>", 0).unwrap();
    let locator = PositionLocator::parse("//body/p[5]").unwrap();
    assert_eq!(locator.resolve(&doc), None);
}

#[test]
fn locate_round_trips_through_scope() {
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, mut geometry, layout) = laid_out(&paragraphs(60), &continuous);
    geometry.scroll_to(500.0, Axis::Y);

    let node = locator::first_visible_element(&doc, &geometry, &layout, 0.0).unwrap();
    let located = locator::locate(&doc, &geometry, &layout, 0.0).unwrap();
    assert_eq!(located.as_str(), "//body/p[16]");
    assert_eq!(located.scope(doc.page()).descope().resolve(&doc), Some(node));
}

#[test]
fn locate_honours_chrome_offset() {
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, geometry, layout) = laid_out(&paragraphs(60), &continuous);

    // 40px of toolbar hides the first paragraph (0..22.4) and its gap.
    let located = locator::locate(&doc, &geometry, &layout, 40.0).unwrap();
    assert_eq!(located.as_str(), "//body/p[2]");
}

#[test]
fn locate_empty_document_returns_none() {
    let mut doc = ContentDocument::empty(0);
    let mut geometry = FlowGeometry::new(viewport());
    let layout = LayoutCoordinator::new().apply(
        &mut doc,
        &mut geometry,
        &settings(LayoutMode::SingleColumn, WritingDirection::Horizontal),
    );
    assert_eq!(locator::locate(&doc, &geometry, &layout, 0.0), None);
}

#[test]
fn locate_skips_no_observe_subtrees() {
    let markup = "<div class=\"no-observe\"><p>Banner</p></div><p>Body text</p>";
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, geometry, layout) = laid_out(markup, &continuous);

    let located = locator::locate(&doc, &geometry, &layout, 0.0).unwrap();
    assert_eq!(located.as_str(), "//body/p[1]");
}

#[test]
fn locate_inline_candidates_anchor_on_their_paragraph() {
    let markup = "<p><span>Lead</span> text and <a href=\"#n\">a link</a></p><p>Next</p>";
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, geometry, layout) = laid_out(markup, &continuous);

    let located = locator::locate(&doc, &geometry, &layout, 0.0).unwrap();
    assert_eq!(located.as_str(), "//body/p[1]");
}

#[test]
fn locate_double_column_reads_left_column_first() {
    let double = settings(LayoutMode::DoubleColumn, WritingDirection::Horizontal);
    let (doc, geometry, layout) = laid_out(&paragraphs(40), &double);

    let located = locator::locate(&doc, &geometry, &layout, 0.0).unwrap();
    assert_eq!(located.as_str(), "//body/p[1]");
}

// ========== PAGER ==========

#[test]
fn pager_single_column_three_pages() {
    let page = pager::compute(&metrics(0.0, 3000.0), LayoutMode::SingleColumn, WritingDirection::Horizontal);
    assert_eq!(page.page_size, 1000.0);
    assert_eq!(page.total, 3);
    assert_eq!(page.current, 1);

    let second = pager::compute(&metrics(1000.0, 3000.0), LayoutMode::SingleColumn, WritingDirection::Horizontal);
    assert_eq!(second.current, 2);

    let last = pager::compute(&metrics(2000.0, 3000.0), LayoutMode::SingleColumn, WritingDirection::Horizontal);
    assert_eq!(last.current, 3);
}

#[test]
fn pager_offset_950_stays_on_second_page_so_paging_is_monotonic() {
    // Page 3 here would be followed by page 2 at offset 1000, where
    // offset_for_page(2) must land.
    let page = pager::compute(&metrics(950.0, 3000.0), LayoutMode::SingleColumn, WritingDirection::Horizontal);
    assert_eq!(page.page_size, 1000.0);
    assert_eq!(page.total, 3);
    assert_eq!(page.current, 2);

    let next = pager::compute(&metrics(1000.0, 3000.0), LayoutMode::SingleColumn, WritingDirection::Horizontal);
    assert_eq!(next.current, 2);
}

#[test]
fn pager_is_monotonic_and_bounded() {
    for extent in [2500.0, 3000.0, 4321.0] {
        let mut previous = 1;
        let max_offset = extent - 1000.0;
        let mut offset = 0.0;
        while offset <= max_offset {
            let page = pager::compute(&metrics(offset, extent), LayoutMode::DoubleColumn, WritingDirection::Horizontal);
            assert!(page.current >= 1 && page.current <= page.total, "offset {}", offset);
            assert!(page.current >= previous, "offset {} went back", offset);
            previous = page.current;
            offset += 7.0;
        }
    }
}

#[test]
fn pager_offset_for_page_is_inverse() {
    for n in 1..=3 {
        let offset = pager::offset_for_page(n, 1000.0);
        let page = pager::compute(&metrics(offset, 3000.0), LayoutMode::SingleColumn, WritingDirection::Horizontal);
        assert_eq!(page.current, n);
    }
    assert_eq!(pager::offset_for_page(0, 1000.0), 0.0);
}

#[test]
fn pager_continuous_is_always_one_page() {
    let page = pager::compute(&metrics(3000.0, 9000.0), LayoutMode::Continuous, WritingDirection::Horizontal);
    assert_eq!((page.current, page.total), (1, 1));
}

#[test]
fn pager_zero_sizes_are_one_page() {
    let zero_viewport = ViewportMetrics {
        width: 0.0,
        height: 0.0,
        scroll_offset: 0.0,
        scroll_extent: 0.0,
    };
    let page = pager::compute(&zero_viewport, LayoutMode::SingleColumn, WritingDirection::Horizontal);
    assert_eq!((page.current, page.total), (1, 1));

    let short = pager::compute(&metrics(0.0, 600.0), LayoutMode::DoubleColumn, WritingDirection::Horizontal);
    assert_eq!((page.current, page.total), (1, 1));
}

#[test]
fn pager_vertical_pages_along_height() {
    let page = pager::compute(&metrics(800.0, 2400.0), LayoutMode::SingleColumn, WritingDirection::Vertical);
    assert_eq!(page.page_size, 800.0);
    assert_eq!((page.current, page.total), (2, 3));
}

#[test]
fn page_state_boundaries() {
    let state = PageState::new(0, 3);
    assert!(state.is_first_page());
    assert!(!state.is_last_page());
    assert!(PageState::new(2, 3).is_last_page());
}

// ========== LAYOUT ==========

#[test]
fn layout_apply_is_idempotent() {
    let single = settings(LayoutMode::SingleColumn, WritingDirection::Horizontal);
    let mut doc = ContentDocument::parse(&paragraphs(60), 0).unwrap();
    let mut geometry = FlowGeometry::new(viewport());
    let mut coordinator = LayoutCoordinator::new();

    let first = coordinator.apply(&mut doc, &mut geometry, &single);
    let boxes: Vec<_> = doc.elements().iter().map(|n| geometry.document_box(*n)).collect();
    let anchor = locator::locate(&doc, &geometry, &first, 0.0);

    let second = coordinator.apply(&mut doc, &mut geometry, &single);
    let again: Vec<_> = doc.elements().iter().map(|n| geometry.document_box(*n)).collect();

    assert_eq!(first, second);
    assert_eq!(boxes, again);
    assert_eq!(anchor, locator::locate(&doc, &geometry, &second, 0.0));
}

#[test]
fn layout_relative_margins_pinned_under_columns() {
    let mut style = settings(LayoutMode::SingleColumn, WritingDirection::Horizontal);
    style.style.margin_left = CssLength::Vw(5.0);
    style.style.margin_right = CssLength::Percent(10.0);

    let (doc, _, layout) = laid_out("<p>Text</p>", &style);
    assert_eq!(layout.margin_left_px, 50.0);
    assert_eq!(layout.margin_right_px, 100.0);
    assert_eq!(doc.style(doc.root(), "margin-left"), Some("50px"));
    assert_eq!(doc.style(doc.root(), "margin-right"), Some("100px"));
    assert_eq!(layout.column_gap, 150.0);

    style.layout_mode = LayoutMode::Continuous;
    let (doc, _, _) = laid_out("<p>Text</p>", &style);
    assert_eq!(doc.style(doc.root(), "margin-left"), Some("5vw"));
    assert_eq!(doc.style(doc.root(), "column-width"), None);
}

#[test]
fn layout_column_sizes_per_mode_and_direction() {
    let (_, _, single) = laid_out("<p>x</p>", &settings(LayoutMode::SingleColumn, WritingDirection::Horizontal));
    assert_eq!(single.column_width, Some(500.0));
    assert_eq!(single.column_height, Some(800.0));

    let (_, _, double) = laid_out("<p>x</p>", &settings(LayoutMode::DoubleColumn, WritingDirection::Horizontal));
    assert_eq!(double.column_width, Some(250.0));

    let (_, _, vertical) = laid_out("<p>x</p>", &settings(LayoutMode::SingleColumn, WritingDirection::Vertical));
    assert_eq!(vertical.column_width, Some(1000.0));
    assert_eq!(vertical.column_height, Some(400.0));

    let (_, _, continuous) = laid_out("<p>x</p>", &settings(LayoutMode::Continuous, WritingDirection::Horizontal));
    assert_eq!(continuous.column_width, None);
    assert_eq!(continuous.column_gap, 0.0);
}

#[test]
fn layout_element_styles_skip_style_nodes() {
    let mut style = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    style.style.font_family = "serif".to_string();
    style.style.line_height = 150;
    let (doc, _, _) = laid_out("<style>p {}</style><p>Text</p>", &style);

    let children: Vec<_> = doc.element_children(doc.root()).collect();
    assert_eq!(doc.style(children[0], "font-family"), None);
    assert_eq!(doc.style(children[1], "font-family"), Some("serif"));
    assert_eq!(doc.style(children[1], "line-height"), Some("1.5"));
}

#[test]
fn layout_keeps_author_inline_styles_across_passes() {
    let markup = r#"<p style="text-align: right; font-family: Georgia">Signed</p><p>Body</p>"#;
    let mut doc = ContentDocument::parse(markup, 0).unwrap();
    let mut geometry = FlowGeometry::new(viewport());
    let mut coordinator = LayoutCoordinator::new();
    let signed = doc.element_children(doc.root()).next().unwrap();

    let mut serif = settings(LayoutMode::SingleColumn, WritingDirection::Horizontal);
    serif.style.font_family = "serif".to_string();
    coordinator.apply(&mut doc, &mut geometry, &serif);
    assert_eq!(doc.style(signed, "font-family"), Some("serif"));
    assert_eq!(doc.style(doc.root(), "column-width"), Some("500px"));

    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    coordinator.apply(&mut doc, &mut geometry, &continuous);
    coordinator.apply(&mut doc, &mut geometry, &continuous);
    assert_eq!(doc.style(signed, "font-family"), Some("Georgia"));
    assert_eq!(doc.style(signed, "text-align"), Some("right"));
    assert_eq!(doc.style(signed, "line-height"), Some("1.4"));
    assert_eq!(doc.style(doc.root(), "column-width"), None);
}

#[test]
fn layout_double_column_filler_follows_layout_changes() {
    let fillers = |doc: &ContentDocument| {
        doc.elements()
            .into_iter()
            .filter(|n| doc.has_class(*n, FILLER_CLASS))
            .count()
    };

    let double = settings(LayoutMode::DoubleColumn, WritingDirection::Horizontal);
    let mut doc = ContentDocument::parse(&paragraphs(60), 0).unwrap();
    let mut geometry = FlowGeometry::new(viewport());
    let mut coordinator = LayoutCoordinator::new();

    let applied = coordinator.apply(&mut doc, &mut geometry, &double);
    assert!(applied.has_filler);
    assert_eq!(fillers(&doc), 1);
    assert_eq!(pager::measure(&geometry, &applied).total, 2);

    // Re-applying keeps exactly one filler.
    coordinator.apply(&mut doc, &mut geometry, &double);
    assert_eq!(fillers(&doc), 1);

    let single = settings(LayoutMode::SingleColumn, WritingDirection::Horizontal);
    let applied = coordinator.apply(&mut doc, &mut geometry, &single);
    assert!(!applied.has_filler);
    assert_eq!(fillers(&doc), 0);
}

#[test]
fn layout_filler_node_is_reused_across_passes() {
    let double = settings(LayoutMode::DoubleColumn, WritingDirection::Horizontal);
    let single = settings(LayoutMode::SingleColumn, WritingDirection::Horizontal);
    let mut doc = ContentDocument::parse(&paragraphs(60), 0).unwrap();
    let mut geometry = FlowGeometry::new(viewport());
    let mut coordinator = LayoutCoordinator::new();

    assert!(coordinator.apply(&mut doc, &mut geometry, &double).has_filler);
    let slots = doc.node_count();

    for _ in 0..5 {
        coordinator.apply(&mut doc, &mut geometry, &single);
        assert!(coordinator.apply(&mut doc, &mut geometry, &double).has_filler);
    }
    assert_eq!(doc.node_count(), slots);
    let fillers = doc
        .elements()
        .into_iter()
        .filter(|n| doc.has_class(*n, FILLER_CLASS))
        .count();
    assert_eq!(fillers, 1);
}

#[test]
fn layout_single_image_page_is_centered_without_filler() {
    let double = settings(LayoutMode::DoubleColumn, WritingDirection::Horizontal);
    let (doc, _, layout) = laid_out("<div><img src=\"cover.jpg\" width=\"200\" height=\"300\"/></div>", &double);
    assert!(layout.single_image);
    assert!(!layout.has_filler);
    let div = doc.element_children(doc.root()).next().unwrap();
    assert_eq!(doc.style(div, "text-align"), Some("center"));
}

#[test]
fn layout_vertical_single_column_pages_along_y() {
    let vertical = settings(LayoutMode::SingleColumn, WritingDirection::Vertical);
    let (_, geometry, layout) = laid_out(&paragraphs(60), &vertical);
    assert_eq!(layout.scroll_axis(), Axis::Y);

    let page = pager::measure(&geometry, &layout);
    assert_eq!(page.page_size, 800.0);
    assert_eq!(page.total, 2);
}

// ========== SCROLL ==========

#[tokio::test(start_paused = true)]
async fn scroll_settles_on_offset() {
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, mut geometry, layout) = laid_out(&paragraphs(60), &continuous);
    let mut scheduler = ScrollScheduler::new(ScrollPolicy::default());

    let request = ScrollRequest::new(ScrollTarget::Offset(500.0), &layout, doc.token());
    let outcome = scheduler.scroll(request, &doc, &mut geometry).await;
    assert_eq!(outcome, ScrollOutcome::Settled { offset: 500.0 });
    assert!(!scheduler.is_busy());
}

#[tokio::test(start_paused = true)]
async fn scroll_end_lands_at_end_of_range() {
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, mut geometry, layout) = laid_out(&paragraphs(60), &continuous);
    let mut scheduler = ScrollScheduler::default();

    let request = ScrollRequest::new(ScrollTarget::End, &layout, doc.token());
    scheduler.scroll(request, &doc, &mut geometry).await;

    let metrics = geometry.metrics(Axis::Y);
    assert_eq!(metrics.scroll_offset, metrics.scroll_extent - 800.0);
}

#[tokio::test(start_paused = true)]
async fn scroll_times_out_and_resolves() {
    let doc = ContentDocument::empty(0);
    let layout = AppliedLayout::unstyled(viewport());
    let mut geometry = StuckGeometry;
    let mut scheduler = ScrollScheduler::new(ScrollPolicy {
        timeout: Duration::from_millis(100),
        ..ScrollPolicy::default()
    });

    let started = tokio::time::Instant::now();
    let request = ScrollRequest::new(ScrollTarget::Offset(1200.0), &layout, doc.token());
    let outcome = scheduler.scroll(request, &doc, &mut geometry).await;

    assert_eq!(outcome, ScrollOutcome::TimedOut { offset: 0.0 });
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(!scheduler.is_busy());
}

#[tokio::test(start_paused = true)]
async fn scroll_for_stale_document_is_discarded() {
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, mut geometry, layout) = laid_out(&paragraphs(60), &continuous);
    let old = ContentDocument::empty(0);
    let mut scheduler = ScrollScheduler::default();

    let request = ScrollRequest::new(ScrollTarget::Offset(500.0), &layout, old.token());
    let outcome = scheduler.scroll(request, &doc, &mut geometry).await;

    assert_eq!(outcome, ScrollOutcome::Stale);
    assert_eq!(geometry.scroll_offset(Axis::Y), 0.0);
}

#[tokio::test(start_paused = true)]
async fn scroll_empty_document_stays_at_zero() {
    let mut doc = ContentDocument::empty(0);
    let mut geometry = FlowGeometry::new(viewport());
    let layout = LayoutCoordinator::new().apply(
        &mut doc,
        &mut geometry,
        &settings(LayoutMode::SingleColumn, WritingDirection::Horizontal),
    );
    let mut scheduler = ScrollScheduler::default();

    let request = ScrollRequest::new(ScrollTarget::End, &layout, doc.token());
    let outcome = scheduler.scroll(request, &doc, &mut geometry).await;
    assert_eq!(outcome, ScrollOutcome::Settled { offset: 0.0 });
    assert_eq!(pager::measure(&geometry, &layout).current, 1);
}

#[tokio::test(start_paused = true)]
async fn scroll_element_target_snaps_to_its_page() {
    let single = settings(LayoutMode::SingleColumn, WritingDirection::Horizontal);
    let (doc, mut geometry, layout) = laid_out(&paragraphs(60), &single);
    let target = PositionLocator::parse("//body/p[30]").unwrap().resolve(&doc).unwrap();
    let mut scheduler = ScrollScheduler::default();

    let request = ScrollRequest::new(ScrollTarget::Element(target), &layout, doc.token());
    let outcome = scheduler.scroll(request, &doc, &mut geometry).await;

    assert_eq!(outcome, ScrollOutcome::Settled { offset: 1000.0 });
    assert_eq!(pager::measure(&geometry, &layout).current, 2);
}

#[tokio::test(start_paused = true)]
async fn scroll_element_target_keeps_leading_margin_in_view() {
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let mut doc = ContentDocument::parse(&paragraphs(60), 0).unwrap();
    let mut geometry = RecordingGeometry::new(20.0);
    let layout = LayoutCoordinator::new().apply(&mut doc, &mut geometry, &continuous);
    let target = PositionLocator::parse("//body/p[30]").unwrap().resolve(&doc).unwrap();
    let top = geometry.inner.document_box(target).unwrap().y;
    let mut scheduler = ScrollScheduler::default();

    let request = ScrollRequest::new(ScrollTarget::Element(target), &layout, doc.token());
    let outcome = scheduler.scroll(request, &doc, &mut geometry).await;

    let ScrollOutcome::Settled { offset } = outcome else {
        panic!("scroll did not settle: {:?}", outcome);
    };
    assert!((offset - (top - 20.0)).abs() < 0.01);
}

#[tokio::test(start_paused = true)]
async fn scroll_dropped_request_releases_guard() {
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, mut geometry, layout) = laid_out(&paragraphs(60), &continuous);
    let mut scheduler = ScrollScheduler::default();
    scheduler.request(ScrollRequest::new(ScrollTarget::Offset(300.0), &layout, doc.token()));
    assert!(scheduler.is_busy());

    {
        let mut flush = tokio_test::task::spawn(scheduler.flush(&doc, &mut geometry));
        tokio_test::assert_pending!(flush.poll());
    }

    assert!(!scheduler.is_busy());
    assert_eq!(geometry.scroll_offset(Axis::Y), 0.0);
}

#[tokio::test(start_paused = true)]
async fn scroll_debouncer_waits_for_quiet_period() {
    let mut debouncer = ScrollDebouncer::new(Duration::from_millis(200));
    assert!(!debouncer.settled().await);

    let started = tokio::time::Instant::now();
    debouncer.record();
    assert!(debouncer.is_pending());
    assert!(debouncer.settled().await);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!debouncer.is_pending());
}

// ========== NAVIGATION ==========

#[test]
fn navigation_stack_retraces_history() {
    let (a, b, c) = (ChapterId(1), ChapterId(2), ChapterId(3));
    let mut stack = NavigationStack::new();
    stack.push(a);
    stack.push(b);
    stack.push(c);
    stack.push(c);
    assert_eq!(stack.len(), 3);

    assert_eq!(stack.back_from(c), Some(b));
    assert_eq!(stack.back_from(b), Some(a));
    assert_eq!(stack.back_from(a), None);
    assert!(stack.is_empty());
}

#[test]
fn navigation_prefetch_fires_once_per_direction() {
    let chapter = ChapterId(4);
    let mut prefetch = PrefetchTracker::new(10);

    assert_eq!(prefetch.due(chapter, &PageState::new(0, 30)), vec![Direction::Backward]);
    assert!(prefetch.due(chapter, &PageState::new(5, 30)).is_empty());
    assert!(prefetch.due(chapter, &PageState::new(15, 30)).is_empty());
    assert_eq!(prefetch.due(chapter, &PageState::new(20, 30)), vec![Direction::Forward]);
    assert!(prefetch.due(chapter, &PageState::new(29, 30)).is_empty());

    // Another chapter gets its own budget.
    assert_eq!(
        prefetch.due(ChapterId(5), &PageState::new(0, 3)),
        vec![Direction::Forward, Direction::Backward]
    );
}

// ========== OVERLAY ==========

#[test]
fn overlay_skips_images_below_threshold() {
    let markup = "<p><img src=\"plate.png\" width=\"300\" height=\"400\"/></p>\
                  <p><img src=\"icon.png\" width=\"50\" height=\"50\"/></p>\
                  <p><img src=\"map.png\" width=\"600\" height=\"300\"/></p>";
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, geometry, _) = laid_out(markup, &continuous);

    let mut overlay = OverlayInjector::new(OverlayConfig::default());
    let markers = overlay.refresh(&doc, &geometry);
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].inline_element_index, 0);
    assert_eq!(markers[0].position, Rect::new(260.0, 8.0, 32.0, 32.0));
    assert_eq!(markers[1].inline_element_index, 2);
    assert_eq!(markers[1].locator.as_str(), "//body/p[3]/img[1]");
}

#[test]
fn overlay_marker_state_comes_from_snapshot() {
    let markup = "<p><img src=\"a.png\" width=\"300\" height=\"400\"/></p>\
                  <p><img src=\"b.png\" width=\"300\" height=\"400\"/></p>";
    let continuous = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (doc, geometry, _) = laid_out(markup, &continuous);

    let mut overlay = OverlayInjector::default();
    overlay.set_bookmarks(vec![ImageBookmark {
        page: 0,
        inline_element_index: 1,
    }]);
    overlay.refresh(&doc, &geometry);

    assert!(!overlay.marker(0).unwrap().bookmarked);
    assert!(overlay.marker(1).unwrap().bookmarked);

    overlay.set_bookmarks(Vec::new());
    assert!(!overlay.marker(1).unwrap().bookmarked);
}

// ========== SESSION ==========

#[tokio::test(start_paused = true)]
async fn session_back_twice_retraces_history_without_prev_lookup() {
    let backend = MemoryBackend::with_chapters(vec![
        vec!["<p>Chapter A</p>".to_string()],
        vec!["<p>Chapter B</p>".to_string()],
        vec!["<p>Chapter C</p>".to_string()],
    ]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );

    session.open().await.unwrap();
    session.next_chapter().await.unwrap();
    session.next_chapter().await.unwrap();
    assert_eq!(session.context().chapter_id, ChapterId(3));
    assert_eq!(session.history().len(), 3);

    session.prev_chapter().await.unwrap();
    assert_eq!(session.context().chapter_id, ChapterId(2));
    session.prev_chapter().await.unwrap();
    assert_eq!(session.context().chapter_id, ChapterId(1));

    let prev_calls = session.backend().prev_calls.lock().clone();
    assert!(!prev_calls.contains(&ChapterId(2)));
    assert!(!prev_calls.contains(&ChapterId(3)));
    assert!(session.prev_disabled());
}

#[tokio::test(start_paused = true)]
async fn session_prev_chapter_without_history_asks_backend() {
    let backend = MemoryBackend::with_chapters(vec![
        vec!["<p>Chapter A</p>".to_string()],
        vec!["<p>Chapter B</p>".to_string()],
    ]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(2),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );

    session.open().await.unwrap();
    session.prev_chapter().await.unwrap();
    assert_eq!(session.context().chapter_id, ChapterId(1));

    // B's predecessor is asked once, at open; entering A asks about A.
    let prev_calls = session.backend().prev_calls.lock().clone();
    assert_eq!(prev_calls, vec![ChapterId(2), ChapterId(1)]);
    assert!(session.prev_disabled());
}

#[tokio::test(start_paused = true)]
async fn session_pages_through_virtual_pages_then_reports_end() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60)]]);
    let (mut session, mut events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::SingleColumn, WritingDirection::Horizontal),
        SessionOptions::default(),
    );

    session.open().await.unwrap();
    assert_eq!(session.page_state().virtual_page, 1);
    assert_eq!(session.page_state().total_virtual_pages, 3);

    session.next_page().await.unwrap();
    assert_eq!(session.page_state().virtual_page, 2);
    session.prev_page().await.unwrap();
    assert_eq!(session.page_state().virtual_page, 1);

    session.next_page().await.unwrap();
    session.next_page().await.unwrap();
    assert_eq!(session.page_state().virtual_page, 3);
    drain(&mut events);

    session.next_page().await.unwrap();
    assert!(session.next_disabled());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ReaderEvent::Toast {
            level: ToastLevel::Info,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn session_backward_page_lands_at_end() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60), paragraphs(10)]]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::SingleColumn, WritingDirection::Horizontal),
        SessionOptions::default(),
    );

    session.open().await.unwrap();
    session.jump_to(crate::session::ResumePoint::Page(1)).await.unwrap();
    assert_eq!(session.page_state().page_num, 1);

    session.prev_page().await.unwrap();
    let state = session.page_state();
    assert_eq!(state.page_num, 0);
    assert_eq!(state.virtual_page, 3);
    assert_eq!(state.total_virtual_pages, 3);
}

#[tokio::test(start_paused = true)]
async fn session_resumes_saved_locator_and_saves_progress() {
    let db = Database::open_memory().unwrap();
    db.save_progress(&ProgressRecord {
        chapter_id: 1,
        library_id: 1,
        series_id: 1,
        volume_id: 1,
        page_num: 0,
        locator: Some("//body/p[10]".to_string()),
        updated_at: now_timestamp(),
    })
    .unwrap();

    let mut catalog = ChapterCatalog::new();
    catalog.push_markup(1, 1, "One", vec![paragraphs(60)]);
    let (mut session, _events) = ReaderSession::new(
        LocalBackend::new(db.clone(), catalog),
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );

    session.open().await.unwrap();
    assert_eq!(session.locator().map(|l| l.as_str()), Some("//body/p[10]"));

    let saved = db.get_progress(1).unwrap().unwrap();
    assert_eq!(saved.locator.as_deref(), Some("//body/p[10]"));
}

#[tokio::test(start_paused = true)]
async fn session_layout_switch_keeps_anchor_visible() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60)]]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );
    session.open().await.unwrap();

    let anchor = PositionLocator::parse("//body/p[30]").unwrap();
    session
        .jump_to(crate::session::ResumePoint::Locator(anchor.clone()))
        .await
        .unwrap();
    assert_eq!(session.locator(), Some(&anchor));

    session
        .apply_settings(settings(LayoutMode::SingleColumn, WritingDirection::Horizontal))
        .await
        .unwrap();
    assert_eq!(session.page_state().virtual_page, 2);

    let node = anchor.resolve(session.document()).unwrap();
    let visible = Rect::new(0.0, 0.0, 1000.0, 800.0);
    assert!(session.geometry().bounding_box(node).unwrap().intersects(&visible));
}

#[tokio::test(start_paused = true)]
async fn session_user_scroll_updates_position() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60)]]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );
    session.open().await.unwrap();

    let stale = ContentDocument::empty(0).token();
    session.geometry_mut().scroll_to(500.0, Axis::Y);
    session.handle(ReaderInput::Scrolled(stale)).await.unwrap();
    assert_eq!(session.locator().map(|l| l.as_str()), Some("//body/p[1]"));

    let token = session.document().token();
    session.handle(ReaderInput::Scrolled(token)).await.unwrap();
    assert_eq!(session.locator().map(|l| l.as_str()), Some("//body/p[16]"));

    let saved = session.backend().progress.lock().last().cloned().unwrap();
    assert_eq!(saved.locator, session.locator().cloned());
}

#[tokio::test(start_paused = true)]
async fn session_run_settles_a_scroll_burst_once() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60)]]);
    let initial = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        initial.clone(),
        SessionOptions::default(),
    );
    session.open().await.unwrap();
    let saves_before = session.backend().progress.lock().len();

    session.geometry_mut().scroll_to(500.0, Axis::Y);
    let token = session.document().token();
    let (input_tx, input_rx) = mpsc::channel(8);
    let (_settings_tx, settings_rx) = watch::channel(initial);
    for _ in 0..5 {
        input_tx.send(ReaderInput::Scrolled(token)).await.unwrap();
    }

    let started = tokio::time::Instant::now();
    let close_later = async {
        tokio::time::sleep(Duration::from_millis(600)).await;
        input_tx.send(ReaderInput::Close).await.unwrap();
    };
    let (result, ()) = tokio::join!(session.run(input_rx, settings_rx), close_later);
    result.unwrap();

    assert_eq!(session.backend().progress.lock().len(), saves_before + 1);
    assert_eq!(session.locator().map(|l| l.as_str()), Some("//body/p[16]"));
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn session_paginates_before_restoring_scroll() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60)]]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        RecordingGeometry::new(0.0),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );
    session.open().await.unwrap();

    // Continuous layouts page along X but scroll along Y.
    let calls = session.geometry().calls.lock().clone();
    let last_reflow = calls.iter().rposition(|c| c == "reflow").unwrap();
    let after = &calls[last_reflow..];
    let paginated = after.iter().position(|c| c == "metrics X").unwrap();
    let scrolled = after.iter().position(|c| c == "scroll_to").unwrap();
    assert!(paginated < scrolled);
}

#[tokio::test(start_paused = true)]
async fn session_fetch_failure_closes_after_grace() {
    let backend = MemoryBackend {
        fail_content: true,
        ..MemoryBackend::with_chapters(vec![vec!["<p>x</p>".to_string()]])
    };
    let (mut session, mut events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );

    let started = tokio::time::Instant::now();
    let result = session.open().await;
    assert!(matches!(result, Err(ReaderError::Backend(_))));
    assert!(started.elapsed() >= SessionOptions::default().close_grace);
    assert!(session.is_closed());
    assert!(!session.is_loading());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ReaderEvent::Toast {
            level: ToastLevel::Error,
            ..
        }
    )));
    assert_eq!(events.last(), Some(&ReaderEvent::Closed));
    assert!(matches!(session.next_page().await, Err(ReaderError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn session_missing_chapter_closes() {
    let backend = MemoryBackend::with_chapters(vec![vec!["<p>x</p>".to_string()]]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(9),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );
    assert!(matches!(session.open().await, Err(ReaderError::NotFound(_))));
    assert!(session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn session_empty_chapter_does_not_panic() {
    let backend = MemoryBackend::with_chapters(vec![Vec::new()]);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::DoubleColumn, WritingDirection::Horizontal),
        SessionOptions::default(),
    );

    session.open().await.unwrap();
    let state = session.page_state();
    assert_eq!((state.page_num, state.max_pages), (0, 0));
    assert_eq!(session.locator(), None);
    assert_eq!(session.geometry().scroll_offset(Axis::X), 0.0);
}

#[tokio::test(start_paused = true)]
async fn session_waits_for_images_with_timeout() {
    let markup = "<p><img src=\"slow.png\" width=\"300\" height=\"400\"/></p>".to_string();
    let backend = MemoryBackend::with_chapters(vec![vec![markup]]);
    let options = SessionOptions {
        image_timeout: Duration::from_millis(200),
        ..SessionOptions::default()
    };
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()).with_image_latency(u32::MAX),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        options,
    );

    let started = tokio::time::Instant::now();
    session.open().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(session.markers().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn session_bookmark_toggle_round_trip() {
    let db = Database::open_memory().unwrap();
    let mut catalog = ChapterCatalog::new();
    catalog.push_markup(
        1,
        1,
        "Plates",
        vec!["<p>Intro</p><p><img src=\"plate.png\" width=\"300\" height=\"400\"/></p>".to_string()],
    );
    let (mut session, _events) = ReaderSession::new(
        LocalBackend::new(db.clone(), catalog),
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );
    session.open().await.unwrap();
    assert!(!session.markers()[0].bookmarked);

    assert!(session.toggle_bookmark(0).await.unwrap());
    assert!(session.markers()[0].bookmarked);
    assert_eq!(db.get_image_bookmarks(1).unwrap().len(), 1);

    assert!(!session.toggle_bookmark(0).await.unwrap());
    assert!(!session.markers()[0].bookmarked);
    assert!(db.get_image_bookmarks(1).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_bookmark_failure_keeps_local_state() {
    let markup = "<p><img src=\"plate.png\" width=\"300\" height=\"400\"/></p>".to_string();
    let backend = MemoryBackend {
        fail_bookmarks: true,
        ..MemoryBackend::with_chapters(vec![vec![markup]])
    };
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        settings(LayoutMode::Continuous, WritingDirection::Horizontal),
        SessionOptions::default(),
    );
    session.open().await.unwrap();

    assert!(session.toggle_bookmark(0).await.is_err());
    assert!(!session.markers()[0].bookmarked);
    assert!(matches!(
        session.toggle_bookmark(7).await,
        Err(ReaderError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn session_follows_settings_watch() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60)]]);
    let initial = settings(LayoutMode::Continuous, WritingDirection::Horizontal);
    let (mut session, _events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        initial.clone(),
        SessionOptions::default(),
    );
    session.open().await.unwrap();

    let (tx, rx) = watch::channel(initial);
    tx.send(settings(LayoutMode::DoubleColumn, WritingDirection::Horizontal))
        .unwrap();
    drop(tx);
    session.follow_settings(rx).await.unwrap();

    assert_eq!(session.layout().mode, LayoutMode::DoubleColumn);
    assert!(session.page_state().total_virtual_pages >= 2);
}

#[tokio::test(start_paused = true)]
async fn session_run_handles_inputs_until_close() {
    let backend = MemoryBackend::with_chapters(vec![vec![paragraphs(60)]]);
    let initial = settings(LayoutMode::SingleColumn, WritingDirection::Horizontal);
    let (mut session, mut events) = ReaderSession::new(
        backend,
        FlowGeometry::new(viewport()),
        context(1),
        initial.clone(),
        SessionOptions::default(),
    );
    session.open().await.unwrap();

    let (input_tx, input_rx) = mpsc::channel(8);
    let (_settings_tx, settings_rx) = watch::channel(initial);
    input_tx.send(ReaderInput::NextPage).await.unwrap();
    input_tx.send(ReaderInput::Close).await.unwrap();

    session.run(input_rx, settings_rx).await.unwrap();
    assert!(session.is_closed());
    assert_eq!(session.page_state().virtual_page, 2);
    assert!(session.history().is_empty());
    assert_eq!(drain(&mut events).last(), Some(&ReaderEvent::Closed));
}

// ========== STORE ==========

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

#[test]
fn store_save_and_update_progress() {
    let db = test_db();
    let mut record = ProgressRecord {
        chapter_id: 7,
        library_id: 1,
        series_id: 2,
        volume_id: 3,
        page_num: 4,
        locator: Some("//body/p[2]".to_string()),
        updated_at: now_timestamp(),
    };
    db.save_progress(&record).unwrap();

    record.page_num = 9;
    record.locator = None;
    db.save_progress(&record).unwrap();

    let found = db.get_progress(7).unwrap().unwrap();
    assert_eq!(found.page_num, 9);
    assert_eq!(found.locator, None);
    assert_eq!(db.list_progress().unwrap().len(), 1);
    assert!(db.get_progress(8).unwrap().is_none());
}

#[test]
fn store_image_bookmarks_are_unique_per_image() {
    let db = test_db();
    let bookmark = |id: &str| ImageBookmarkRecord {
        id: id.to_string(),
        series_id: 1,
        volume_id: 1,
        chapter_id: 5,
        page: 2,
        inline_element_index: 0,
        locator: "//body/p[1]/img[1]".to_string(),
        created_at: now_timestamp(),
    };
    db.save_image_bookmark(&bookmark("a")).unwrap();
    db.save_image_bookmark(&bookmark("b")).unwrap();
    assert_eq!(db.get_image_bookmarks(5).unwrap().len(), 1);

    assert!(db.delete_image_bookmark(5, 2, 0).unwrap());
    assert!(!db.delete_image_bookmark(5, 2, 0).unwrap());
    assert!(db.get_image_bookmarks(5).unwrap().is_empty());
}

#[test]
fn store_on_disk_database_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("reader.db");

    {
        let db = Database::open(&path).unwrap();
        db.save_progress(&ProgressRecord {
            chapter_id: 1,
            library_id: 1,
            series_id: 1,
            volume_id: 1,
            page_num: 3,
            locator: None,
            updated_at: now_timestamp(),
        })
        .unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.get_progress(1).unwrap().unwrap().page_num, 3);
}

// ========== BACKEND ==========

#[test]
fn catalog_from_directory_reads_chapter_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    for (chapter, pages) in [("01-intro", 2), ("02-middle", 1)] {
        let path = dir.path().join(chapter);
        std::fs::create_dir(&path).unwrap();
        for page in 0..pages {
            std::fs::write(path.join(format!("page{}.xhtml", page)), "<p>text</p>").unwrap();
        }
        std::fs::write(path.join("notes.txt"), "ignored").unwrap();
    }

    let catalog = ChapterCatalog::from_directory(dir.path(), 1).unwrap();
    let chapters = catalog.chapters();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0].title, "01-intro");
    assert_eq!(chapters[0].page_count(), 2);
    assert_eq!(chapters[1].page_count(), 1);
}

#[test]
fn catalog_from_flat_directory_is_one_chapter() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.html"), "<p>a</p>").unwrap();
    std::fs::write(dir.path().join("b.html"), "<p>b</p>").unwrap();

    let catalog = ChapterCatalog::from_directory(dir.path(), 1).unwrap();
    assert_eq!(catalog.chapters().len(), 1);
    assert_eq!(catalog.chapters()[0].page_count(), 2);

    let empty = tempfile::tempdir().unwrap();
    assert!(matches!(
        ChapterCatalog::from_directory(empty.path(), 1),
        Err(ReaderError::NotFound(_))
    ));
}

#[tokio::test]
async fn catalog_pages_follow_file_name_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.xhtml"), "<p>b</p>").unwrap();
    std::fs::write(dir.path().join("a.xhtml"), "<p>a</p>").unwrap();
    std::fs::write(dir.path().join("cover.jpg"), "not a page").unwrap();

    let catalog = ChapterCatalog::from_directory(dir.path(), 1).unwrap();
    assert_eq!(catalog.chapters()[0].page_count(), 2);

    let backend = LocalBackend::new(Database::open_memory().unwrap(), catalog);
    assert_eq!(backend.chapter_content(ChapterId(1), 0).await.unwrap(), "<p>a</p>");
    assert_eq!(backend.chapter_content(ChapterId(1), 1).await.unwrap(), "<p>b</p>");

    assert!(matches!(
        ChapterCatalog::from_directory(&dir.path().join("missing"), 1),
        Err(ReaderError::NotFound(_))
    ));
}

#[tokio::test]
async fn local_backend_serves_pages_and_neighbours() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("p1.xhtml"), "<p>first page</p>").unwrap();

    let mut catalog = ChapterCatalog::from_directory(dir.path(), 1).unwrap();
    let second = catalog.push_markup(1, 1, "Two", vec!["<p>inline</p>".to_string()]);
    let backend = LocalBackend::new(test_db(), catalog);

    let first = ChapterId(1);
    assert_eq!(backend.chapter_content(first, 0).await.unwrap(), "<p>first page</p>");
    assert!(matches!(
        backend.chapter_content(first, 3).await,
        Err(ReaderError::NotFound(_))
    ));
    assert_eq!(backend.next_chapter(1, 1, first, None).await.unwrap(), Some(second));
    assert_eq!(backend.prev_chapter(1, 1, first, None).await.unwrap(), None);
    assert_eq!(backend.chapter_info(ChapterId(42)).await.unwrap(), None);
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[reader]
layout_mode = "double-column"
writing_direction = "vertical"
margin_left = "20px"
margin_right = "10%"
chrome_height = 48

[scroll]
timeout_ms = 500
debounce_ms = 120

[navigation]
prefetch_window = 5

[overlay]
min_width = 150

[database]
path = "/tmp/reader.db"
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.reader.layout_mode, LayoutMode::DoubleColumn);
    assert_eq!(config.reader.writing_direction, WritingDirection::Vertical);
    assert_eq!(config.reader.margin_left, CssLength::Px(20.0));
    assert_eq!(config.reader.margin_right, CssLength::Percent(10.0));
    assert_eq!(config.overlay.min_width, 150.0);
    assert_eq!(config.overlay.min_height, 200.0);

    let options = config.session_options();
    assert_eq!(options.chrome_offset, 48.0);
    assert_eq!(options.scroll.timeout, Duration::from_millis(500));
    assert_eq!(options.debounce, Duration::from_millis(120));
    assert_eq!(options.prefetch_window, 5);

    let settings = config.reader.settings();
    assert_eq!(settings.layout_mode, LayoutMode::DoubleColumn);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.reader.layout_mode, LayoutMode::Continuous);
    assert_eq!(config.reader.margin_left, CssLength::Vw(5.0));
    assert_eq!(config.scroll.tolerance_px, 3.0);
    assert_eq!(config.navigation.prefetch_window, 10);
    assert_eq!(config.overlay, OverlayConfig::default());
}

#[test]
fn config_generated_default_parses() {
    let config = Config::parse(&Config::generate_default()).unwrap();
    assert_eq!(config.reader.font_size, 100);
    assert_eq!(config.scroll.timeout_ms, 1500);
}

#[test]
fn config_rejects_bad_margin() {
    let result = Config::parse("[reader]\nmargin_left = \"wide\"\n");
    assert!(matches!(result, Err(ReaderError::Config(_))));
}
