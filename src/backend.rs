//! Content, progress and bookmark collaborators.
//!
//! The session never talks to storage or the network directly; everything
//! goes through [`ReaderBackend`]. [`LocalBackend`] serves chapters from a
//! directory and keeps progress and bookmarks in SQLite.

use crate::error::Result;
use crate::locator::PositionLocator;
use serde::{Deserialize, Serialize};
use std::fmt;

mod local;

pub use local::{CatalogChapter, ChapterCatalog, LocalBackend};

/// Chapter identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(pub i64);

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifiers describing what is being read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingContext {
    /// Library.
    pub library_id: i64,
    /// Series.
    pub series_id: i64,
    /// Volume of the current chapter.
    pub volume_id: i64,
    /// Current chapter.
    pub chapter_id: ChapterId,
    /// Reading list driving chapter order, if any.
    pub reading_list_id: Option<i64>,
}

/// Chapter metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// Number of server pages.
    pub pages: u32,
    /// Volume the chapter belongs to.
    pub volume_id: i64,
    /// Display title.
    pub title: Option<String>,
}

/// Progress to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Library.
    pub library_id: i64,
    /// Series.
    pub series_id: i64,
    /// Volume.
    pub volume_id: i64,
    /// Chapter.
    pub chapter_id: ChapterId,
    /// Server page, 0-based.
    pub page_num: u32,
    /// Descoped locator of the reading position.
    pub locator: Option<PositionLocator>,
}

/// Progress as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedProgress {
    /// Server page, 0-based.
    pub page_num: u32,
    /// Descoped locator, when one was saved.
    pub locator: Option<PositionLocator>,
}

/// A bookmarked inline image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageBookmark {
    /// Server page.
    pub page: u32,
    /// Ordinal of the image among all images on the page.
    pub inline_element_index: u32,
}

/// Bookmark or unbookmark request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBookmarkRequest {
    /// Series.
    pub series_id: i64,
    /// Volume.
    pub volume_id: i64,
    /// Chapter.
    pub chapter_id: ChapterId,
    /// Server page.
    pub page: u32,
    /// Ordinal of the image on the page.
    pub inline_element_index: u32,
    /// Locator of the image.
    pub locator: PositionLocator,
}

/// Everything the reader needs from the outside world.
///
/// Chapter traversal takes the reading list into account when one is set.
/// A `None` neighbour means there is no chapter in that direction.
pub trait ReaderBackend {
    /// Markup of one server page.
    fn chapter_content(&self, chapter: ChapterId, page: u32) -> impl Future<Output = Result<String>>;

    /// Chapter metadata, `None` if the chapter does not exist.
    fn chapter_info(&self, chapter: ChapterId) -> impl Future<Output = Result<Option<ChapterInfo>>>;

    /// Chapter after `chapter`.
    fn next_chapter(
        &self,
        series_id: i64,
        volume_id: i64,
        chapter: ChapterId,
        reading_list_id: Option<i64>,
    ) -> impl Future<Output = Result<Option<ChapterId>>>;

    /// Chapter before `chapter`.
    fn prev_chapter(
        &self,
        series_id: i64,
        volume_id: i64,
        chapter: ChapterId,
        reading_list_id: Option<i64>,
    ) -> impl Future<Output = Result<Option<ChapterId>>>;

    /// Persist reading progress.
    fn save_progress(&self, update: &ProgressUpdate) -> impl Future<Output = Result<()>>;

    /// Last saved progress for a chapter.
    fn get_progress(&self, chapter: ChapterId) -> impl Future<Output = Result<Option<SavedProgress>>>;

    /// Image bookmarks of a chapter.
    fn bookmarks(&self, chapter: ChapterId) -> impl Future<Output = Result<Vec<ImageBookmark>>>;

    /// Bookmark an image.
    fn bookmark(&self, request: &ImageBookmarkRequest) -> impl Future<Output = Result<()>>;

    /// Remove an image bookmark.
    fn unbookmark(&self, request: &ImageBookmarkRequest) -> impl Future<Output = Result<()>>;
}
