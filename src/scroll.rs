//! Deferred, completion-tracked programmatic scrolling.
//!
//! Requests are recorded first and executed on the next frame, after a short
//! settle delay so that a layout pass which just ran has taken effect. The
//! scheduler then polls the scroll offset every frame until it lands on the
//! target or the timeout expires. Every request carries the token of the
//! document it was made for and is dropped if that document is gone.

use crate::document::{ContentDocument, DocumentToken, NodeId};
use crate::geometry::{Axis, DocumentGeometry};
use crate::layout::AppliedLayout;
use crate::pager::{self, PAGE_TOLERANCE_PX};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Timing knobs for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPolicy {
    /// Length of one render frame.
    pub frame: Duration,
    /// Extra delay after the frame before scrolling.
    pub settle: Duration,
    /// Give up waiting for the offset to land after this long.
    pub timeout: Duration,
    /// Pixel slack when checking arrival.
    pub tolerance: f64,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self {
            frame: Duration::from_millis(16),
            settle: Duration::from_millis(10),
            timeout: Duration::from_millis(1500),
            tolerance: PAGE_TOLERANCE_PX,
        }
    }
}

/// Where to scroll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollTarget {
    /// Absolute offset along the scroll axis.
    Offset(f64),
    /// The start of the document.
    Start,
    /// The end of the scrollable range.
    End,
    /// Bring an element into view. Column layouts snap to the page holding it.
    Element(NodeId),
}

/// One scroll request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollRequest {
    /// Target.
    pub target: ScrollTarget,
    /// Axis to scroll along.
    pub axis: Axis,
    /// Page size to snap element targets to, column layouts only.
    pub snap: Option<f64>,
    /// Leading inset kept free above element targets in continuous layouts,
    /// on top of the element's own leading margin.
    pub inset: f64,
    /// Document the request was made for.
    pub token: DocumentToken,
}

impl ScrollRequest {
    /// Build a request for the given layout.
    pub fn new(target: ScrollTarget, layout: &AppliedLayout, token: DocumentToken) -> Self {
        Self {
            target,
            axis: layout.scroll_axis(),
            snap: layout.mode.is_columnar().then(|| layout.page_size()),
            inset: 0.0,
            token,
        }
    }

    /// Keep `inset` pixels free before element targets.
    pub fn with_inset(mut self, inset: f64) -> Self {
        self.inset = inset.max(0.0);
        self
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollOutcome {
    /// The offset landed within tolerance.
    Settled {
        /// Final offset.
        offset: f64,
    },
    /// The timeout fired first; the request was resolved anyway.
    TimedOut {
        /// Offset when giving up.
        offset: f64,
    },
    /// The document changed before the request ran.
    Stale,
}

impl ScrollOutcome {
    /// Whether the scroll was actually performed.
    pub fn performed(&self) -> bool {
        !matches!(self, ScrollOutcome::Stale)
    }
}

/// Clears the in-flight flag when dropped, including on cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Relaxed);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Runs programmatic scrolls one at a time.
#[derive(Debug, Default)]
pub struct ScrollScheduler {
    policy: ScrollPolicy,
    pending: Option<ScrollRequest>,
    running: AtomicBool,
}

impl ScrollScheduler {
    /// Create a scheduler.
    pub fn new(policy: ScrollPolicy) -> Self {
        Self {
            policy,
            pending: None,
            running: AtomicBool::new(false),
        }
    }

    /// Timing policy.
    pub fn policy(&self) -> &ScrollPolicy {
        &self.policy
    }

    /// Whether a request is queued or running.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some() || self.running.load(Ordering::Relaxed)
    }

    /// Queue a request for the next frame.
    ///
    /// A request that arrives while another is queued or running replaces
    /// it; the overlap is logged.
    pub fn request(&mut self, request: ScrollRequest) {
        if self.is_busy() {
            tracing::warn!(
                goal = ?request.target,
                "Scroll requested while another scroll is in flight"
            );
        }
        self.pending = Some(request);
    }

    /// Drop any queued request.
    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            tracing::debug!("Cancelled pending scroll");
        }
    }

    /// Run the queued request against `doc`.
    ///
    /// Returns `None` when nothing was queued.
    pub async fn flush<G: DocumentGeometry>(
        &mut self,
        doc: &ContentDocument,
        geometry: &mut G,
    ) -> Option<ScrollOutcome> {
        let request = self.pending.take()?;
        let policy = self.policy;
        let _guard = InFlight::enter(&self.running);

        sleep(policy.frame).await;
        sleep(policy.settle).await;

        if request.token != doc.token() {
            tracing::debug!(goal = ?request.target, "Discarding scroll for a stale document");
            return Some(ScrollOutcome::Stale);
        }

        let metrics = geometry.metrics(request.axis);
        let max = (metrics.scroll_extent - metrics.viewport_along(request.axis)).max(0.0);
        let destination = resolve_target(&request, geometry, metrics.scroll_offset).clamp(0.0, max);

        geometry.scroll_to(destination, request.axis);

        let started = Instant::now();
        loop {
            let offset = geometry.metrics(request.axis).scroll_offset;
            if (offset - destination).abs() <= policy.tolerance {
                tracing::trace!(destination, offset, "Scroll settled");
                return Some(ScrollOutcome::Settled { offset });
            }
            if started.elapsed() >= policy.timeout {
                tracing::warn!(
                    destination,
                    offset,
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "Scroll did not settle in time, resolving anyway"
                );
                return Some(ScrollOutcome::TimedOut { offset });
            }
            sleep(policy.frame).await;
        }
    }

    /// Queue a request and run it.
    pub async fn scroll<G: DocumentGeometry>(
        &mut self,
        request: ScrollRequest,
        doc: &ContentDocument,
        geometry: &mut G,
    ) -> ScrollOutcome {
        self.request(request);
        self.flush(doc, geometry)
            .await
            .unwrap_or(ScrollOutcome::Stale)
    }
}

fn resolve_target<G: DocumentGeometry>(request: &ScrollRequest, geometry: &G, current: f64) -> f64 {
    match request.target {
        ScrollTarget::Offset(offset) => offset,
        ScrollTarget::Start => 0.0,
        ScrollTarget::End => f64::INFINITY,
        ScrollTarget::Element(node) => {
            let Some(rect) = geometry.bounding_box(node) else {
                tracing::debug!(node = %node, "Scroll target has no box, staying put");
                return current;
            };
            let position = rect.start(request.axis) + current;
            match request.snap {
                Some(page) if page > 0.0 => {
                    pager::offset_for_page((position / page).floor() as u32 + 1, page)
                }
                _ => position - geometry.computed_margin(node).leading(request.axis) - request.inset,
            }
        }
    }
}

/// Collapses bursts of user scroll events into one.
#[derive(Debug)]
pub struct ScrollDebouncer {
    window: Duration,
    last: Option<Instant>,
}

impl ScrollDebouncer {
    /// Create a debouncer.
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Record a scroll event.
    pub fn record(&mut self) {
        self.last = Some(Instant::now());
    }

    /// Whether an event is waiting to be handled.
    pub fn is_pending(&self) -> bool {
        self.last.is_some()
    }

    /// Forget pending events.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Wait until no event arrived for one full window.
    ///
    /// Returns `false` immediately if nothing is pending.
    pub async fn settled(&mut self) -> bool {
        loop {
            let Some(last) = self.last else {
                return false;
            };
            let quiet_at = last + self.window;
            if Instant::now() >= quiet_at {
                self.last = None;
                return true;
            }
            tokio::time::sleep_until(quiet_at).await;
        }
    }
}
