//! Directory-backed chapters with SQLite progress and bookmarks.

use super::{
    ChapterId, ChapterInfo, ImageBookmark, ImageBookmarkRequest, ProgressUpdate, ReaderBackend,
    SavedProgress,
};
use crate::error::{ReaderError, Result};
use crate::locator::PositionLocator;
use crate::store::{Database, ImageBookmarkRecord, ProgressRecord, now_timestamp};
use std::path::{Path, PathBuf};

const PAGE_EXTENSIONS: &[&str] = &["xhtml", "html", "htm"];

#[derive(Debug, Clone)]
enum PageSource {
    Markup(String),
    File(PathBuf),
}

/// One chapter of the catalog.
#[derive(Debug, Clone)]
pub struct CatalogChapter {
    /// Chapter ID.
    pub id: ChapterId,
    /// Series the chapter belongs to.
    pub series_id: i64,
    /// Volume the chapter belongs to.
    pub volume_id: i64,
    /// Display title.
    pub title: String,
    pages: Vec<PageSource>,
}

impl CatalogChapter {
    /// Number of server pages.
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }
}

/// Ordered list of readable chapters.
#[derive(Debug, Clone, Default)]
pub struct ChapterCatalog {
    chapters: Vec<CatalogChapter>,
}

impl ChapterCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chapter whose pages are held in memory.
    pub fn push_markup(
        &mut self,
        series_id: i64,
        volume_id: i64,
        title: &str,
        pages: Vec<String>,
    ) -> ChapterId {
        self.push(
            series_id,
            volume_id,
            title,
            pages.into_iter().map(PageSource::Markup).collect(),
        )
    }

    fn push(&mut self, series_id: i64, volume_id: i64, title: &str, pages: Vec<PageSource>) -> ChapterId {
        let id = ChapterId(self.chapters.len() as i64 + 1);
        self.chapters.push(CatalogChapter {
            id,
            series_id,
            volume_id,
            title: title.to_string(),
            pages,
        });
        id
    }

    /// Build a catalog from a directory.
    ///
    /// Every subdirectory holding page files becomes one chapter, in name
    /// order. A directory without subdirectories is read as a single chapter.
    pub fn from_directory(path: &Path, series_id: i64) -> Result<Self> {
        let mut catalog = Self::new();
        if !path.is_dir() {
            return Err(ReaderError::NotFound(format!(
                "Chapter directory {}",
                path.display()
            )));
        }

        let mut subdirs: Vec<PathBuf> = entries(path)
            .map(|e| e.into_path())
            .filter(|p| p.is_dir())
            .collect();

        if subdirs.is_empty() {
            subdirs.push(path.to_path_buf());
        }

        for dir in subdirs {
            let pages = page_files(&dir);
            if pages.is_empty() {
                tracing::debug!(dir = %dir.display(), "Skipping directory without pages");
                continue;
            }
            let title = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            catalog.push(
                series_id,
                1,
                &title,
                pages.into_iter().map(PageSource::File).collect(),
            );
        }

        if catalog.chapters.is_empty() {
            return Err(ReaderError::NotFound(format!(
                "No chapter pages under {}",
                path.display()
            )));
        }

        tracing::info!(
            path = %path.display(),
            chapters = catalog.chapters.len(),
            "Loaded chapter catalog"
        );
        Ok(catalog)
    }

    /// All chapters in reading order.
    pub fn chapters(&self) -> &[CatalogChapter] {
        &self.chapters
    }

    /// Look up a chapter.
    pub fn get(&self, id: ChapterId) -> Option<&CatalogChapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    fn neighbour(&self, series_id: i64, chapter: ChapterId, forward: bool) -> Option<ChapterId> {
        let series: Vec<&CatalogChapter> = self
            .chapters
            .iter()
            .filter(|c| c.series_id == series_id)
            .collect();
        let index = series.iter().position(|c| c.id == chapter)?;
        let next = if forward {
            index.checked_add(1)?
        } else {
            index.checked_sub(1)?
        };
        series.get(next).map(|c| c.id)
    }
}

/// Direct children of `dir`, in file name order.
fn entries(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
}

fn page_files(dir: &Path) -> Vec<PathBuf> {
    entries(dir)
        .map(|e| e.into_path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| PAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect()
}

/// Backend serving a [`ChapterCatalog`] and persisting to a [`Database`].
#[derive(Clone)]
pub struct LocalBackend {
    db: Database,
    catalog: ChapterCatalog,
}

impl LocalBackend {
    /// Create a backend.
    pub fn new(db: Database, catalog: ChapterCatalog) -> Self {
        Self { db, catalog }
    }

    /// The chapter catalog.
    pub fn catalog(&self) -> &ChapterCatalog {
        &self.catalog
    }

    /// The underlying store.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn chapter(&self, id: ChapterId) -> Result<&CatalogChapter> {
        self.catalog
            .get(id)
            .ok_or_else(|| ReaderError::NotFound(format!("Chapter {}", id)))
    }
}

impl ReaderBackend for LocalBackend {
    async fn chapter_content(&self, chapter: ChapterId, page: u32) -> Result<String> {
        let entry = self.chapter(chapter)?;
        let source = entry.pages.get(page as usize).ok_or_else(|| {
            ReaderError::NotFound(format!("Page {} of chapter {}", page, chapter))
        })?;
        match source {
            PageSource::Markup(markup) => Ok(markup.clone()),
            PageSource::File(path) => Ok(tokio::fs::read_to_string(path).await?),
        }
    }

    async fn chapter_info(&self, chapter: ChapterId) -> Result<Option<ChapterInfo>> {
        Ok(self.catalog.get(chapter).map(|c| ChapterInfo {
            pages: c.page_count(),
            volume_id: c.volume_id,
            title: Some(c.title.clone()),
        }))
    }

    async fn next_chapter(
        &self,
        series_id: i64,
        _volume_id: i64,
        chapter: ChapterId,
        reading_list_id: Option<i64>,
    ) -> Result<Option<ChapterId>> {
        if let Some(list) = reading_list_id {
            tracing::debug!(list, "Reading lists are not stored locally, using catalog order");
        }
        Ok(self.catalog.neighbour(series_id, chapter, true))
    }

    async fn prev_chapter(
        &self,
        series_id: i64,
        _volume_id: i64,
        chapter: ChapterId,
        reading_list_id: Option<i64>,
    ) -> Result<Option<ChapterId>> {
        if let Some(list) = reading_list_id {
            tracing::debug!(list, "Reading lists are not stored locally, using catalog order");
        }
        Ok(self.catalog.neighbour(series_id, chapter, false))
    }

    async fn save_progress(&self, update: &ProgressUpdate) -> Result<()> {
        self.db.save_progress(&ProgressRecord {
            chapter_id: update.chapter_id.0,
            library_id: update.library_id,
            series_id: update.series_id,
            volume_id: update.volume_id,
            page_num: i64::from(update.page_num),
            locator: update.locator.as_ref().map(|l| l.as_str().to_string()),
            updated_at: now_timestamp(),
        })
    }

    async fn get_progress(&self, chapter: ChapterId) -> Result<Option<SavedProgress>> {
        let Some(record) = self.db.get_progress(chapter.0)? else {
            return Ok(None);
        };
        let locator = match record.locator.as_deref().map(PositionLocator::parse) {
            Some(Ok(locator)) => Some(locator),
            Some(Err(e)) => {
                tracing::warn!(chapter = %chapter, error = %e, "Ignoring unreadable saved locator");
                None
            }
            None => None,
        };
        Ok(Some(SavedProgress {
            page_num: u32::try_from(record.page_num).unwrap_or(0),
            locator,
        }))
    }

    async fn bookmarks(&self, chapter: ChapterId) -> Result<Vec<ImageBookmark>> {
        Ok(self
            .db
            .get_image_bookmarks(chapter.0)?
            .into_iter()
            .filter_map(|b| {
                Some(ImageBookmark {
                    page: u32::try_from(b.page).ok()?,
                    inline_element_index: u32::try_from(b.inline_element_index).ok()?,
                })
            })
            .collect())
    }

    async fn bookmark(&self, request: &ImageBookmarkRequest) -> Result<()> {
        self.db.save_image_bookmark(&ImageBookmarkRecord {
            id: uuid::Uuid::new_v4().to_string(),
            series_id: request.series_id,
            volume_id: request.volume_id,
            chapter_id: request.chapter_id.0,
            page: i64::from(request.page),
            inline_element_index: i64::from(request.inline_element_index),
            locator: request.locator.as_str().to_string(),
            created_at: now_timestamp(),
        })
    }

    async fn unbookmark(&self, request: &ImageBookmarkRequest) -> Result<()> {
        let removed = self.db.delete_image_bookmark(
            request.chapter_id.0,
            i64::from(request.page),
            i64::from(request.inline_element_index),
        )?;
        if !removed {
            tracing::debug!(
                chapter = %request.chapter_id,
                page = request.page,
                index = request.inline_element_index,
                "Image was not bookmarked"
            );
        }
        Ok(())
    }
}
