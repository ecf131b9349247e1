use crate::error::{ReaderError, Result};
use crate::store::*;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ReaderError::Database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ReaderError::Database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- One progress row per chapter
            CREATE TABLE IF NOT EXISTS reading_progress (
                chapter_id INTEGER PRIMARY KEY,
                library_id INTEGER NOT NULL,
                series_id INTEGER NOT NULL,
                volume_id INTEGER NOT NULL,
                page_num INTEGER NOT NULL DEFAULT 0,
                locator TEXT,
                updated_at INTEGER NOT NULL
            );

            -- Image bookmarks
            CREATE TABLE IF NOT EXISTS image_bookmarks (
                id TEXT PRIMARY KEY,
                series_id INTEGER NOT NULL,
                volume_id INTEGER NOT NULL,
                chapter_id INTEGER NOT NULL,
                page INTEGER NOT NULL,
                inline_element_index INTEGER NOT NULL,
                locator TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (chapter_id, page, inline_element_index)
            );

            CREATE INDEX IF NOT EXISTS idx_progress_series ON reading_progress(series_id);
            CREATE INDEX IF NOT EXISTS idx_image_bookmarks_chapter ON image_bookmarks(chapter_id);
            "#,
        )
        .map_err(|e| ReaderError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== PROGRESS OPERATIONS ==========

    /// Save or update reading progress.
    pub fn save_progress(&self, progress: &ProgressRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reading_progress
             (chapter_id, library_id, series_id, volume_id, page_num, locator, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (chapter_id) DO UPDATE SET
                library_id = excluded.library_id,
                series_id = excluded.series_id,
                volume_id = excluded.volume_id,
                page_num = excluded.page_num,
                locator = excluded.locator,
                updated_at = excluded.updated_at",
            params![
                progress.chapter_id,
                progress.library_id,
                progress.series_id,
                progress.volume_id,
                progress.page_num,
                progress.locator,
                progress.updated_at,
            ],
        )
        .map_err(|e| ReaderError::Database(format!("Failed to save progress: {}", e)))?;
        Ok(())
    }

    /// Get reading progress for a chapter.
    pub fn get_progress(&self, chapter_id: i64) -> Result<Option<ProgressRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT chapter_id, library_id, series_id, volume_id, page_num, locator, updated_at
             FROM reading_progress WHERE chapter_id = ?1",
            params![chapter_id],
            row_to_progress,
        )
        .optional()
        .map_err(|e| ReaderError::Database(format!("Failed to get progress: {}", e)))
    }

    /// List all progress rows, most recent first.
    pub fn list_progress(&self) -> Result<Vec<ProgressRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT chapter_id, library_id, series_id, volume_id, page_num, locator, updated_at
                 FROM reading_progress ORDER BY updated_at DESC, chapter_id",
            )
            .map_err(|e| ReaderError::Database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], row_to_progress)
            .map_err(|e| ReaderError::Database(format!("Failed to list progress: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ReaderError::Database(format!("Failed to collect progress: {}", e)))?;

        Ok(rows)
    }

    // ========== IMAGE BOOKMARK OPERATIONS ==========

    /// Save an image bookmark. Bookmarking the same image twice is a no-op.
    pub fn save_image_bookmark(&self, bookmark: &ImageBookmarkRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO image_bookmarks
             (id, series_id, volume_id, chapter_id, page, inline_element_index, locator, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (chapter_id, page, inline_element_index) DO NOTHING",
            params![
                bookmark.id,
                bookmark.series_id,
                bookmark.volume_id,
                bookmark.chapter_id,
                bookmark.page,
                bookmark.inline_element_index,
                bookmark.locator,
                bookmark.created_at,
            ],
        )
        .map_err(|e| ReaderError::Database(format!("Failed to save image bookmark: {}", e)))?;
        Ok(())
    }

    /// Get image bookmarks for a chapter.
    pub fn get_image_bookmarks(&self, chapter_id: i64) -> Result<Vec<ImageBookmarkRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, series_id, volume_id, chapter_id, page, inline_element_index,
                        locator, created_at
                 FROM image_bookmarks WHERE chapter_id = ?1
                 ORDER BY page, inline_element_index",
            )
            .map_err(|e| ReaderError::Database(format!("Failed to prepare query: {}", e)))?;

        let bookmarks = stmt
            .query_map(params![chapter_id], |row| {
                Ok(ImageBookmarkRecord {
                    id: row.get(0)?,
                    series_id: row.get(1)?,
                    volume_id: row.get(2)?,
                    chapter_id: row.get(3)?,
                    page: row.get(4)?,
                    inline_element_index: row.get(5)?,
                    locator: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(|e| ReaderError::Database(format!("Failed to get image bookmarks: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                ReaderError::Database(format!("Failed to collect image bookmarks: {}", e))
            })?;

        Ok(bookmarks)
    }

    /// Delete an image bookmark.
    pub fn delete_image_bookmark(
        &self,
        chapter_id: i64,
        page: i64,
        inline_element_index: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM image_bookmarks
                 WHERE chapter_id = ?1 AND page = ?2 AND inline_element_index = ?3",
                params![chapter_id, page, inline_element_index],
            )
            .map_err(|e| ReaderError::Database(format!("Failed to delete image bookmark: {}", e)))?;
        Ok(rows > 0)
    }
}

fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRecord> {
    Ok(ProgressRecord {
        chapter_id: row.get(0)?,
        library_id: row.get(1)?,
        series_id: row.get(2)?,
        volume_id: row.get(3)?,
        page_num: row.get(4)?,
        locator: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
