//! reflow-reader: reading position tracking and virtual pagination for
//! reflowable ebook content.
//!
//! The engine keeps a reader anchored to the same logical position while the
//! content underneath is re-laid out: font or margin changes, window resizes,
//! switching between continuous scrolling and one- or two-column paging, and
//! horizontal or vertical writing.
//!
//! # Features
//!
//! - Structural position locators that survive re-layout
//! - Virtual pages derived purely from scroll geometry
//! - Deferred, tolerance-checked programmatic scrolling
//! - Continuous cross-chapter navigation with history and prefetch
//! - Bookmark markers over inline images
//! - Local progress and bookmark store (SQLite)
//! - Headless flow layout for the CLI and tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Content, progress and bookmark collaborators.
pub mod backend;
/// Configuration and CLI.
pub mod config;
/// Content document tree.
pub mod document;
/// Error types.
pub mod error;
/// Rendering geometry.
pub mod geometry;
/// Layout modes and the layout coordinator.
pub mod layout;
/// Position locators.
pub mod locator;
/// Chapter navigation.
pub mod navigation;
/// Bookmark overlay.
pub mod overlay;
/// Virtual pagination.
pub mod pager;
/// Programmatic scrolling.
pub mod scroll;
/// Reader session.
pub mod session;
/// Local database.
pub mod store;

#[cfg(test)]
mod tests;

pub use backend::{ChapterId, LocalBackend, ReaderBackend, ReadingContext};
pub use config::{Cli, Command, Config};
pub use error::{ReaderError, Result};
pub use locator::PositionLocator;
pub use session::{ReaderEvent, ReaderInput, ReaderSession};
pub use store::Database;
