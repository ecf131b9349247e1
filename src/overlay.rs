//! Bookmark markers over inline images.
//!
//! Every image large enough to be worth bookmarking gets a marker in the
//! top-right corner of its box. Marker positions are relative to the image's
//! container and are recomputed after every layout pass; bookmark state comes
//! from the last snapshot fetched from the backend.

use crate::backend::ImageBookmark;
use crate::document::{ContentDocument, NodeId};
use crate::geometry::{DocumentGeometry, Rect};
use crate::locator::PositionLocator;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Marker sizing and eligibility thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Minimum rendered image width for a marker.
    #[serde(default = "default_min_width")]
    pub min_width: f64,
    /// Minimum rendered image height for a marker.
    #[serde(default = "default_min_height")]
    pub min_height: f64,
    /// Marker edge length.
    #[serde(default = "default_marker_size")]
    pub marker_size: f64,
    /// Distance from the image's top and right edges.
    #[serde(default = "default_marker_inset")]
    pub marker_inset: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_width: default_min_width(),
            min_height: default_min_height(),
            marker_size: default_marker_size(),
            marker_inset: default_marker_inset(),
        }
    }
}

fn default_min_width() -> f64 {
    100.0
}

fn default_min_height() -> f64 {
    200.0
}

fn default_marker_size() -> f64 {
    32.0
}

fn default_marker_inset() -> f64 {
    8.0
}

/// Marker attached to one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookmarkMarker {
    /// Server page of the image.
    pub page: u32,
    /// Ordinal among all images on the page.
    pub inline_element_index: u32,
    /// Image node.
    #[serde(skip)]
    pub node: NodeId,
    /// Locator of the image.
    pub locator: PositionLocator,
    /// Marker box relative to the image's container.
    pub position: Rect,
    /// Whether the image is bookmarked.
    pub bookmarked: bool,
}

/// Keeps markers in sync with layout and bookmark state.
#[derive(Debug, Default)]
pub struct OverlayInjector {
    config: OverlayConfig,
    snapshot: HashSet<ImageBookmark>,
    markers: Vec<BookmarkMarker>,
}

impl OverlayInjector {
    /// Create an injector.
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            snapshot: HashSet::new(),
            markers: Vec::new(),
        }
    }

    /// Replace the bookmark snapshot.
    pub fn set_bookmarks(&mut self, bookmarks: impl IntoIterator<Item = ImageBookmark>) {
        self.snapshot = bookmarks.into_iter().collect();
        for marker in &mut self.markers {
            marker.bookmarked = self.snapshot.contains(&ImageBookmark {
                page: marker.page,
                inline_element_index: marker.inline_element_index,
            });
        }
    }

    /// Current markers.
    pub fn markers(&self) -> &[BookmarkMarker] {
        &self.markers
    }

    /// Marker for an image ordinal.
    pub fn marker(&self, inline_element_index: u32) -> Option<&BookmarkMarker> {
        self.markers
            .iter()
            .find(|m| m.inline_element_index == inline_element_index)
    }

    /// Update local state after a successful toggle.
    pub fn set_bookmarked(&mut self, inline_element_index: u32, bookmarked: bool) {
        let Some(marker) = self
            .markers
            .iter_mut()
            .find(|m| m.inline_element_index == inline_element_index)
        else {
            return;
        };
        marker.bookmarked = bookmarked;
        let key = ImageBookmark {
            page: marker.page,
            inline_element_index,
        };
        if bookmarked {
            self.snapshot.insert(key);
        } else {
            self.snapshot.remove(&key);
        }
    }

    /// Drop all markers, for example when the page changes.
    pub fn clear(&mut self) {
        self.markers.clear();
    }

    /// Recompute markers for the current layout.
    pub fn refresh<G: DocumentGeometry>(&mut self, doc: &ContentDocument, geometry: &G) -> &[BookmarkMarker] {
        let page = doc.page();
        let mut markers = Vec::new();

        for (ordinal, image) in doc.images().into_iter().enumerate() {
            let Some(image_box) = geometry.bounding_box(image) else {
                continue;
            };
            if image_box.width < self.config.min_width || image_box.height < self.config.min_height {
                continue;
            }

            let container = doc
                .parent(image)
                .and_then(|p| geometry.bounding_box(p))
                .unwrap_or(image_box);
            let size = self.config.marker_size;
            let inset = self.config.marker_inset;
            let position = Rect::new(
                image_box.right() - size - inset - container.x,
                image_box.y + inset - container.y,
                size,
                size,
            );

            let inline_element_index = ordinal as u32;
            markers.push(BookmarkMarker {
                page,
                inline_element_index,
                node: image,
                locator: PositionLocator::encode(doc, image),
                position,
                bookmarked: self.snapshot.contains(&ImageBookmark {
                    page,
                    inline_element_index,
                }),
            });
        }

        tracing::debug!(page, markers = markers.len(), "Refreshed bookmark markers");
        self.markers = markers;
        &self.markers
    }
}
