//! Reader session: ties layout, pagination, scrolling, navigation and
//! overlays together.
//!
//! A session owns the current [`ContentDocument`] and the geometry it is
//! rendered into. Every discrete input (a key press, a settings change, a
//! settled scroll) runs the same pipeline to completion before the next one
//! is handled:
//!
//! ```text
//! fetch -> parse -> render -> images settle -> layout -> pagination
//!       -> scroll restore -> locate -> overlay -> progress save
//! ```
//!
//! User scrolling is the exception: [`run`](ReaderSession::run) only records
//! each scroll event and settles the burst once the debounce window passes
//! without another one.
//!
//! State changes are published as [`ReaderEvent`]s on an unbounded channel.

use crate::backend::{
    ChapterId, ImageBookmarkRequest, ProgressUpdate, ReaderBackend, ReadingContext,
};
use crate::document::{ContentDocument, DocumentToken};
use crate::error::{ReaderError, Result};
use crate::geometry::DocumentGeometry;
use crate::layout::{AppliedLayout, LayoutCoordinator, ReaderSettings};
use crate::locator::{self, PositionLocator};
use crate::navigation::{Direction, NavigationStack, NeighbourCache, PrefetchTracker};
use crate::overlay::{BookmarkMarker, OverlayConfig, OverlayInjector};
use crate::pager::{self, PageState};
use crate::scroll::{ScrollDebouncer, ScrollPolicy, ScrollRequest, ScrollScheduler, ScrollTarget};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep};

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Height of fixed chrome covering the top of the viewport.
    pub chrome_offset: f64,
    /// Programmatic scroll timing.
    pub scroll: ScrollPolicy,
    /// Quiet period before a user scroll is considered finished.
    pub debounce: Duration,
    /// Give up waiting for images after this long.
    pub image_timeout: Duration,
    /// Pages from a chapter boundary that trigger a neighbour prefetch.
    pub prefetch_window: u32,
    /// Delay between a fatal load error and closing the reader.
    pub close_grace: Duration,
    /// Bookmark marker settings.
    pub overlay: OverlayConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chrome_offset: 0.0,
            scroll: ScrollPolicy::default(),
            debounce: Duration::from_millis(200),
            image_timeout: Duration::from_secs(5),
            prefetch_window: crate::navigation::DEFAULT_PREFETCH_WINDOW,
            close_grace: Duration::from_secs(1),
            overlay: OverlayConfig::default(),
        }
    }
}

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    /// Informational.
    Info,
    /// Something failed.
    Error,
}

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// Loading started or finished.
    Loading(bool),
    /// A chapter was entered.
    ChapterChanged {
        /// Chapter.
        chapter: ChapterId,
        /// Chapter title.
        title: Option<String>,
    },
    /// Page or virtual page changed.
    PageChanged(PageState),
    /// Bookmark markers changed.
    BookmarksChanged(Vec<BookmarkMarker>),
    /// Short message for the reader.
    Toast {
        /// Severity.
        level: ToastLevel,
        /// Message text.
        message: String,
    },
    /// The reader closed.
    Closed,
}

/// Where to jump.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// Element on the current page.
    Locator(PositionLocator),
    /// Server page of the current chapter, 0-based.
    Page(u32),
    /// Element id on the current page.
    Anchor(String),
}

/// Discrete inputs a UI feeds into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderInput {
    /// Next (virtual) page.
    NextPage,
    /// Previous (virtual) page.
    PrevPage,
    /// Next chapter.
    NextChapter,
    /// Previous chapter.
    PrevChapter,
    /// The user scrolled the given document.
    Scrolled(DocumentToken),
    /// Viewport size changed; the geometry already reflects the new size.
    Resized,
    /// New reader settings.
    Settings(ReaderSettings),
    /// Jump to a position.
    Jump(ResumePoint),
    /// Toggle the bookmark of the image with this ordinal.
    ToggleBookmark(u32),
    /// Close the reader.
    Close,
}

#[derive(Debug, Clone, PartialEq)]
enum Landing {
    Start,
    End,
    Locator(PositionLocator),
    Anchor(String),
}

/// One open reader.
pub struct ReaderSession<B, G> {
    backend: B,
    geometry: G,
    options: SessionOptions,
    context: ReadingContext,
    settings: ReaderSettings,
    doc: ContentDocument,
    coordinator: LayoutCoordinator,
    layout: AppliedLayout,
    scheduler: ScrollScheduler,
    debouncer: ScrollDebouncer,
    overlay: OverlayInjector,
    stack: NavigationStack,
    prefetch: PrefetchTracker,
    neighbours: NeighbourCache,
    state: PageState,
    locator: Option<PositionLocator>,
    loading: bool,
    closed: bool,
    events: mpsc::UnboundedSender<ReaderEvent>,
}

impl<B: ReaderBackend, G: DocumentGeometry> ReaderSession<B, G> {
    /// Create a session. Call [`open`](Self::open) to load the chapter.
    pub fn new(
        backend: B,
        geometry: G,
        context: ReadingContext,
        settings: ReaderSettings,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ReaderEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let layout = AppliedLayout::unstyled(geometry.viewport());
        let session = Self {
            backend,
            geometry,
            context,
            settings,
            doc: ContentDocument::empty(0),
            coordinator: LayoutCoordinator::new(),
            layout,
            scheduler: ScrollScheduler::new(options.scroll),
            debouncer: ScrollDebouncer::new(options.debounce),
            overlay: OverlayInjector::new(options.overlay.clone()),
            stack: NavigationStack::new(),
            prefetch: PrefetchTracker::new(options.prefetch_window),
            neighbours: NeighbourCache::default(),
            state: PageState::new(0, 0),
            locator: None,
            loading: false,
            closed: false,
            options,
            events,
        };
        (session, receiver)
    }

    /// Current page state.
    pub fn page_state(&self) -> PageState {
        self.state
    }

    /// Whether a page is being loaded.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether moving forward is impossible: last page of the last chapter.
    pub fn next_disabled(&self) -> bool {
        self.state.is_last_page()
            && self.state.is_last_virtual()
            && self.neighbours.get(self.context.chapter_id, Direction::Forward) == Some(None)
    }

    /// Whether moving backward is impossible: first page of the first chapter.
    pub fn prev_disabled(&self) -> bool {
        self.state.is_first_page()
            && self.state.is_first_virtual()
            && self.stack.below_top().is_none()
            && self.neighbours.get(self.context.chapter_id, Direction::Backward) == Some(None)
    }

    /// Last known reading position.
    pub fn locator(&self) -> Option<&PositionLocator> {
        self.locator.as_ref()
    }

    /// What is being read.
    pub fn context(&self) -> &ReadingContext {
        &self.context
    }

    /// Active settings.
    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Current document.
    pub fn document(&self) -> &ContentDocument {
        &self.doc
    }

    /// Active layout.
    pub fn layout(&self) -> &AppliedLayout {
        &self.layout
    }

    /// Rendering geometry.
    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Mutable rendering geometry, e.g. to resize it before sending
    /// [`ReaderInput::Resized`].
    pub fn geometry_mut(&mut self) -> &mut G {
        &mut self.geometry
    }

    /// Chapter history.
    pub fn history(&self) -> &NavigationStack {
        &self.stack
    }

    /// Bookmark markers on the current page.
    pub fn markers(&self) -> &[BookmarkMarker] {
        self.overlay.markers()
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Load the chapter from the context, resuming saved progress.
    pub async fn open(&mut self) -> Result<()> {
        self.ensure_open()?;
        let chapter = self.context.chapter_id;
        tracing::info!(chapter = %chapter, series = self.context.series_id, "Opening reader");

        let resume = match self.backend.get_progress(chapter).await {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(chapter = %chapter, error = %e, "Could not load saved progress");
                None
            }
        };
        let (page, landing) = match resume {
            Some(progress) => (
                progress.page_num,
                progress.locator.map_or(Landing::Start, Landing::Locator),
            ),
            None => (0, Landing::Start),
        };

        self.enter_chapter(chapter, page, landing).await
    }

    /// Handle one input.
    pub async fn handle(&mut self, input: ReaderInput) -> Result<()> {
        match input {
            ReaderInput::NextPage => self.next_page().await,
            ReaderInput::PrevPage => self.prev_page().await,
            ReaderInput::NextChapter => self.next_chapter().await,
            ReaderInput::PrevChapter => self.prev_chapter().await,
            ReaderInput::Scrolled(token) => {
                if self.note_user_scroll(token) {
                    self.settle_user_scroll().await;
                }
                Ok(())
            }
            ReaderInput::Resized => self.on_viewport_changed().await,
            ReaderInput::Settings(settings) => self.apply_settings(settings).await,
            ReaderInput::Jump(point) => self.jump_to(point).await,
            ReaderInput::ToggleBookmark(index) => self.toggle_bookmark(index).await.map(|_| ()),
            ReaderInput::Close => {
                self.close();
                Ok(())
            }
        }
    }

    /// Drive the session from an input channel and a settings watch until
    /// the reader closes or the inputs end.
    pub async fn run(
        &mut self,
        mut inputs: mpsc::Receiver<ReaderInput>,
        mut settings: watch::Receiver<ReaderSettings>,
    ) -> Result<()> {
        let mut watching = true;
        while !self.closed {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(ReaderInput::Scrolled(token)) => {
                        self.note_user_scroll(token);
                    }
                    Some(input) => {
                        if let Err(e) = self.handle(input).await
                            && !self.closed
                        {
                            tracing::warn!(error = %e, "Reader input failed");
                        }
                    }
                    None => self.close(),
                },
                settled = self.debouncer.settled(), if self.debouncer.is_pending() => {
                    if settled && !self.closed {
                        self.after_scroll().await;
                    }
                },
                changed = settings.changed(), if watching => match changed {
                    Ok(()) => {
                        let next = settings.borrow_and_update().clone();
                        self.apply_settings(next).await?;
                    }
                    Err(_) => watching = false,
                },
            }
        }
        Ok(())
    }

    /// Apply every settings change until the sender goes away.
    pub async fn follow_settings(&mut self, mut settings: watch::Receiver<ReaderSettings>) -> Result<()> {
        while settings.changed().await.is_ok() {
            let next = settings.borrow_and_update().clone();
            self.apply_settings(next).await?;
        }
        Ok(())
    }

    /// Advance one virtual page, server page or chapter.
    pub async fn next_page(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.layout.mode.is_columnar() && !self.state.is_last_virtual() {
            let offset = pager::offset_for_page(self.state.virtual_page + 1, self.layout.page_size());
            return self.scroll_to(ScrollTarget::Offset(offset)).await;
        }
        if !self.state.is_last_page() {
            return self.load_page(self.state.page_num + 1, Landing::Start).await;
        }
        self.next_chapter().await
    }

    /// Go back one virtual page, server page or chapter.
    pub async fn prev_page(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.layout.mode.is_columnar() && !self.state.is_first_virtual() {
            let offset = pager::offset_for_page(self.state.virtual_page - 1, self.layout.page_size());
            return self.scroll_to(ScrollTarget::Offset(offset)).await;
        }
        if !self.state.is_first_page() {
            return self.load_page(self.state.page_num - 1, Landing::End).await;
        }
        self.prev_chapter().await
    }

    /// Move to the next chapter.
    pub async fn next_chapter(&mut self) -> Result<()> {
        self.ensure_open()?;
        let current = self.context.chapter_id;
        match self.neighbour(current, Direction::Forward).await {
            Some(next) => {
                self.stack.push(next);
                self.enter_chapter(next, 0, Landing::Start).await
            }
            None => {
                self.toast(ToastLevel::Info, "There is no next chapter");
                Ok(())
            }
        }
    }

    /// Move to the previous chapter, retracing the session history first.
    pub async fn prev_chapter(&mut self) -> Result<()> {
        self.ensure_open()?;
        let current = self.context.chapter_id;

        if let Some(previous) = self.stack.back_from(current) {
            tracing::debug!(from = %current, to = %previous, "Returning to chapter from history");
            return self.enter_chapter(previous, u32::MAX, Landing::End).await;
        }

        match self.neighbour(current, Direction::Backward).await {
            Some(previous) => {
                self.stack.push(previous);
                self.enter_chapter(previous, u32::MAX, Landing::End).await
            }
            None => {
                self.stack.push(current);
                self.toast(ToastLevel::Info, "There is no previous chapter");
                Ok(())
            }
        }
    }

    /// Jump to a position in the current chapter.
    pub async fn jump_to(&mut self, point: ResumePoint) -> Result<()> {
        self.ensure_open()?;
        match point {
            ResumePoint::Page(page) => {
                let page = page.min(self.state.max_pages.saturating_sub(1));
                if page != self.state.page_num {
                    self.load_page(page, Landing::Start).await
                } else {
                    self.scroll_to(ScrollTarget::Start).await
                }
            }
            ResumePoint::Locator(locator) => {
                self.restore(Landing::Locator(locator)).await;
                self.after_scroll().await;
                Ok(())
            }
            ResumePoint::Anchor(id) => {
                self.restore(Landing::Anchor(id)).await;
                self.after_scroll().await;
                Ok(())
            }
        }
    }

    /// Apply new reader settings, keeping the reading position.
    pub async fn apply_settings(&mut self, settings: ReaderSettings) -> Result<()> {
        self.ensure_open()?;
        if settings == self.settings {
            return Ok(());
        }
        tracing::debug!(
            mode = ?settings.layout_mode,
            direction = ?settings.writing_direction,
            "Reader settings changed"
        );
        self.settings = settings;
        self.relayout().await;
        Ok(())
    }

    /// Re-run layout after the viewport changed size.
    pub async fn on_viewport_changed(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.relayout().await;
        Ok(())
    }

    /// Record a user scroll event. Returns `false` when it was ignored.
    pub fn note_user_scroll(&mut self, token: DocumentToken) -> bool {
        if self.closed || self.loading || token != self.doc.token() {
            tracing::trace!("Ignoring scroll event for a stale or loading document");
            return false;
        }
        self.debouncer.record();
        true
    }

    /// Wait for user scrolling to stop, then update position and progress.
    pub async fn settle_user_scroll(&mut self) {
        if self.debouncer.settled().await {
            self.after_scroll().await;
        }
    }

    /// Toggle the bookmark of an image. Returns the new state.
    pub async fn toggle_bookmark(&mut self, inline_element_index: u32) -> Result<bool> {
        self.ensure_open()?;
        let marker = self
            .overlay
            .marker(inline_element_index)
            .cloned()
            .ok_or_else(|| {
                ReaderError::NotFound(format!("Bookmarkable image {}", inline_element_index))
            })?;

        let request = ImageBookmarkRequest {
            series_id: self.context.series_id,
            volume_id: self.context.volume_id,
            chapter_id: self.context.chapter_id,
            page: marker.page,
            inline_element_index,
            locator: marker.locator.clone(),
        };
        let result = if marker.bookmarked {
            self.backend.unbookmark(&request).await
        } else {
            self.backend.bookmark(&request).await
        };
        if let Err(e) = result {
            tracing::warn!(
                chapter = %request.chapter_id,
                page = request.page,
                index = inline_element_index,
                error = %e,
                "Bookmark update failed"
            );
            self.toast(ToastLevel::Error, "Could not update bookmark");
            return Err(e);
        }

        let bookmarked = !marker.bookmarked;
        self.overlay.set_bookmarked(inline_element_index, bookmarked);
        match self.backend.bookmarks(self.context.chapter_id).await {
            Ok(snapshot) => self.overlay.set_bookmarks(snapshot),
            Err(e) => tracing::warn!(error = %e, "Could not refresh bookmarks"),
        }
        self.emit(ReaderEvent::BookmarksChanged(self.overlay.markers().to_vec()));
        Ok(bookmarked)
    }

    /// Close the reader and forget the chapter history.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stack.clear();
        self.scheduler.cancel();
        self.debouncer.reset();
        self.set_loading(false);
        tracing::info!(chapter = %self.context.chapter_id, "Reader closed");
        self.emit(ReaderEvent::Closed);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ReaderError::Closed)
        } else {
            Ok(())
        }
    }

    async fn enter_chapter(&mut self, chapter: ChapterId, page: u32, landing: Landing) -> Result<()> {
        self.set_loading(true);
        let info = match self.backend.chapter_info(chapter).await {
            Ok(Some(info)) => info,
            Ok(None) => return self.fail(ReaderError::NotFound(format!("Chapter {}", chapter))).await,
            Err(e) => return self.fail(e).await,
        };

        self.context.chapter_id = chapter;
        self.context.volume_id = info.volume_id;
        self.stack.push(chapter);
        tracing::info!(chapter = %chapter, pages = info.pages, "Entered chapter");
        self.emit(ReaderEvent::ChapterChanged {
            chapter,
            title: info.title.clone(),
        });

        match self.backend.bookmarks(chapter).await {
            Ok(snapshot) => self.overlay.set_bookmarks(snapshot),
            Err(e) => {
                tracing::warn!(chapter = %chapter, error = %e, "Could not load bookmarks");
                self.overlay.set_bookmarks(Vec::new());
            }
        }

        // Next is needed for the disabled flag; previous only when the
        // history cannot answer it.
        self.neighbour(chapter, Direction::Forward).await;
        if self.stack.below_top().is_none() {
            self.neighbour(chapter, Direction::Backward).await;
        }

        if info.pages == 0 {
            tracing::warn!(chapter = %chapter, "Chapter has no pages");
            self.state = PageState::new(0, 0);
            self.locator = None;
            self.show_document(ContentDocument::empty(0), Landing::Start).await;
            return Ok(());
        }

        let page = page.min(info.pages - 1);
        self.state = PageState::new(page, info.pages);
        self.load_page(page, landing).await
    }

    async fn load_page(&mut self, page: u32, landing: Landing) -> Result<()> {
        self.set_loading(true);
        self.scheduler.cancel();
        self.debouncer.reset();
        self.overlay.clear();

        let chapter = self.context.chapter_id;
        let markup = match self.backend.chapter_content(chapter, page).await {
            Ok(markup) => markup,
            Err(e) => return self.fail(e).await,
        };
        let doc = match ContentDocument::parse(&markup, page) {
            Ok(doc) => doc,
            Err(e) => return self.fail(e).await,
        };

        tracing::debug!(chapter = %chapter, page, "Loaded page");
        self.state = PageState::new(page, self.state.max_pages);
        self.locator = None;
        self.show_document(doc, landing).await;
        Ok(())
    }

    async fn show_document(&mut self, doc: ContentDocument, landing: Landing) {
        self.doc = doc;
        self.geometry.reflow(&self.doc, &self.layout);
        self.wait_for_images().await;
        self.layout = self
            .coordinator
            .apply(&mut self.doc, &mut self.geometry, &self.settings);
        self.paginate();
        self.restore(landing).await;
        self.set_loading(false);
        self.after_scroll().await;
    }

    async fn wait_for_images(&mut self) {
        let started = Instant::now();
        loop {
            let state = self.geometry.poll_images();
            if state.is_settled() {
                if state.errored > 0 {
                    tracing::debug!(errored = state.errored, total = state.total, "Some images failed to load");
                }
                return;
            }
            if started.elapsed() >= self.options.image_timeout {
                tracing::warn!(
                    loaded = state.loaded,
                    errored = state.errored,
                    total = state.total,
                    "Images did not settle in time, continuing"
                );
                return;
            }
            sleep(self.options.scroll.frame).await;
        }
    }

    async fn relayout(&mut self) {
        let anchor = locator::locate(&self.doc, &self.geometry, &self.layout, self.options.chrome_offset)
            .or_else(|| self.locator.clone());
        self.scheduler.cancel();
        self.layout = self
            .coordinator
            .apply(&mut self.doc, &mut self.geometry, &self.settings);
        self.paginate();
        let landing = anchor.map_or(Landing::Start, Landing::Locator);
        self.restore(landing).await;
        self.after_scroll().await;
    }

    async fn restore(&mut self, landing: Landing) {
        let target = match landing {
            Landing::Start => ScrollTarget::Start,
            Landing::End => ScrollTarget::End,
            Landing::Locator(locator) => match locator.resolve(&self.doc) {
                Some(node) => ScrollTarget::Element(node),
                None => {
                    tracing::debug!(locator = %locator, "Locator did not resolve, starting at the top");
                    ScrollTarget::Start
                }
            },
            Landing::Anchor(id) => match self.doc.find_by_id(&id) {
                Some(node) => ScrollTarget::Element(node),
                None => {
                    tracing::debug!(anchor = %id, "Anchor not found, starting at the top");
                    ScrollTarget::Start
                }
            },
        };
        let request = ScrollRequest::new(target, &self.layout, self.doc.token())
            .with_inset(self.options.chrome_offset);
        self.scheduler.scroll(request, &self.doc, &mut self.geometry).await;
    }

    async fn scroll_to(&mut self, target: ScrollTarget) -> Result<()> {
        let request = ScrollRequest::new(target, &self.layout, self.doc.token());
        self.scheduler.scroll(request, &self.doc, &mut self.geometry).await;
        self.after_scroll().await;
        Ok(())
    }

    /// Measure virtual pages for the layout just applied.
    fn paginate(&mut self) {
        let virtual_page = pager::measure(&self.geometry, &self.layout);
        self.state = self.state.with_virtual(virtual_page);
    }

    async fn after_scroll(&mut self) {
        self.paginate();

        if let Some(locator) =
            locator::locate(&self.doc, &self.geometry, &self.layout, self.options.chrome_offset)
        {
            self.locator = Some(locator);
        }

        self.overlay.refresh(&self.doc, &self.geometry);
        self.emit(ReaderEvent::PageChanged(self.state));
        self.prefetch_neighbours().await;
        self.save_progress().await;
    }

    async fn neighbour(&mut self, chapter: ChapterId, direction: Direction) -> Option<ChapterId> {
        if let Some(known) = self.neighbours.get(chapter, direction) {
            return known;
        }
        let ctx = &self.context;
        let result = match direction {
            Direction::Forward => {
                self.backend
                    .next_chapter(ctx.series_id, ctx.volume_id, chapter, ctx.reading_list_id)
                    .await
            }
            Direction::Backward => {
                self.backend
                    .prev_chapter(ctx.series_id, ctx.volume_id, chapter, ctx.reading_list_id)
                    .await
            }
        };
        match result {
            Ok(neighbour) => {
                self.neighbours.insert(chapter, direction, neighbour);
                neighbour
            }
            Err(e) => {
                tracing::warn!(chapter = %chapter, ?direction, error = %e, "Chapter lookup failed");
                None
            }
        }
    }

    async fn prefetch_neighbours(&mut self) {
        let chapter = self.context.chapter_id;
        for direction in self.prefetch.due(chapter, &self.state) {
            let Some(neighbour) = self.neighbour(chapter, direction).await else {
                tracing::debug!(chapter = %chapter, ?direction, "No chapter to prefetch");
                continue;
            };
            match self.backend.chapter_info(neighbour).await {
                Ok(Some(info)) => {
                    tracing::debug!(chapter = %neighbour, pages = info.pages, ?direction, "Prefetched chapter")
                }
                Ok(None) => {
                    tracing::debug!(chapter = %neighbour, ?direction, "Prefetched chapter does not exist");
                    self.neighbours.insert(chapter, direction, None);
                }
                Err(e) => tracing::warn!(chapter = %neighbour, error = %e, "Prefetch failed"),
            }
        }
    }

    async fn save_progress(&self) {
        if self.closed || self.state.max_pages == 0 {
            return;
        }
        let update = ProgressUpdate {
            library_id: self.context.library_id,
            series_id: self.context.series_id,
            volume_id: self.context.volume_id,
            chapter_id: self.context.chapter_id,
            page_num: self.state.page_num,
            locator: self.locator.clone(),
        };
        if let Err(e) = self.backend.save_progress(&update).await {
            tracing::warn!(
                chapter = %update.chapter_id,
                page = update.page_num,
                error = %e,
                "Failed to save progress"
            );
        }
    }

    async fn fail(&mut self, error: ReaderError) -> Result<()> {
        tracing::error!(chapter = %self.context.chapter_id, error = %error, "Could not load chapter");
        self.toast(ToastLevel::Error, &format!("Could not load chapter: {}", error));
        sleep(self.options.close_grace).await;
        self.close();
        Err(error)
    }

    fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.emit(ReaderEvent::Loading(loading));
        }
    }

    fn toast(&self, level: ToastLevel, message: &str) {
        self.emit(ReaderEvent::Toast {
            level,
            message: message.to_string(),
        });
    }

    fn emit(&self, event: ReaderEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Reader event dropped, no listener");
        }
    }
}
