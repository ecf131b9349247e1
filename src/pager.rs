//! Virtual pagination over scroll geometry.
//!
//! Column layouts have no native pages, so a "virtual page" is one viewport
//! worth of scroll distance along the paging axis. Everything here is pure
//! math over [`ViewportMetrics`]; the geometry provider is only consulted to
//! read the metrics.

use crate::geometry::{DocumentGeometry, ViewportMetrics};
use crate::layout::{AppliedLayout, LayoutMode, WritingDirection, paging_axis};
use serde::{Deserialize, Serialize};

/// Sub-pixel slack when comparing scroll offsets.
pub const PAGE_TOLERANCE_PX: f64 = 3.0;

/// Reader position in server pages and virtual pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    /// Server page, 0-based.
    pub page_num: u32,
    /// Number of server pages in the chapter.
    pub max_pages: u32,
    /// Current virtual page, 1-based.
    pub virtual_page: u32,
    /// Number of virtual pages on this server page.
    pub total_virtual_pages: u32,
}

impl PageState {
    /// State at the start of a server page.
    pub fn new(page_num: u32, max_pages: u32) -> Self {
        Self {
            page_num,
            max_pages,
            virtual_page: 1,
            total_virtual_pages: 1,
        }
    }

    /// Replace the virtual part.
    pub fn with_virtual(self, virtual_page: VirtualPage) -> Self {
        Self {
            virtual_page: virtual_page.current,
            total_virtual_pages: virtual_page.total,
            ..self
        }
    }

    /// First server page of the chapter.
    pub fn is_first_page(&self) -> bool {
        self.page_num == 0
    }

    /// Last server page of the chapter.
    pub fn is_last_page(&self) -> bool {
        self.page_num + 1 >= self.max_pages
    }

    /// On the first virtual page.
    pub fn is_first_virtual(&self) -> bool {
        self.virtual_page <= 1
    }

    /// On the last virtual page.
    pub fn is_last_virtual(&self) -> bool {
        self.virtual_page >= self.total_virtual_pages
    }
}

/// Result of a pagination pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VirtualPage {
    /// Current virtual page, 1-based.
    pub current: u32,
    /// Total virtual pages.
    pub total: u32,
    /// Page size in pixels along the paging axis.
    pub page_size: f64,
}

impl VirtualPage {
    fn single(page_size: f64) -> Self {
        Self {
            current: 1,
            total: 1,
            page_size,
        }
    }
}

/// Compute the virtual page from metrics along the paging axis.
pub fn compute(
    metrics: &ViewportMetrics,
    mode: LayoutMode,
    direction: WritingDirection,
) -> VirtualPage {
    let page_size = metrics.viewport_along(paging_axis(direction)).max(0.0);

    if !mode.is_columnar() || page_size <= 0.0 {
        return VirtualPage::single(page_size);
    }

    let extent = metrics.scroll_extent.max(0.0);
    let offset = metrics.scroll_offset.clamp(0.0, extent);
    if extent <= page_size + PAGE_TOLERANCE_PX {
        return VirtualPage::single(page_size);
    }

    let total = (((extent - PAGE_TOLERANCE_PX) / page_size).ceil() as u32).max(1);
    let delta = extent - offset;

    let current = if (delta - extent).abs() <= PAGE_TOLERANCE_PX {
        // Nothing scrolled yet.
        1
    } else if delta <= page_size + PAGE_TOLERANCE_PX {
        // At most one page of content remains: the viewport sits at the end.
        total
    } else if (delta - (extent - page_size)).abs() <= PAGE_TOLERANCE_PX {
        // Exactly one page scrolled.
        2.min(total)
    } else {
        let page = ((offset + page_size) / page_size).round();
        (page as u32).clamp(1, total)
    };

    VirtualPage {
        current,
        total,
        page_size,
    }
}

/// Compute the virtual page for the current geometry and layout.
pub fn measure<G: DocumentGeometry>(geometry: &G, layout: &AppliedLayout) -> VirtualPage {
    let metrics = geometry.metrics(layout.paging_axis());
    compute(&metrics, layout.mode, layout.direction)
}

/// Scroll offset at which virtual page `page` starts.
pub fn offset_for_page(page: u32, page_size: f64) -> f64 {
    f64::from(page.saturating_sub(1)) * page_size.max(0.0)
}

/// Whether an offset counts as having reached `target`.
pub fn reached(offset: f64, target: f64) -> bool {
    (offset - target).abs() <= PAGE_TOLERANCE_PX
}
