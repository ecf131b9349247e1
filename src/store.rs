mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reading progress for a chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Chapter ID.
    pub chapter_id: i64,
    /// Library ID.
    pub library_id: i64,
    /// Series ID.
    pub series_id: i64,
    /// Volume ID.
    pub volume_id: i64,
    /// Server page, 0-based.
    pub page_num: i64,
    /// Descoped position locator.
    pub locator: Option<String>,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Bookmarked inline image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBookmarkRecord {
    /// Bookmark ID.
    pub id: String,
    /// Series ID.
    pub series_id: i64,
    /// Volume ID.
    pub volume_id: i64,
    /// Chapter ID.
    pub chapter_id: i64,
    /// Server page.
    pub page: i64,
    /// Image ordinal on the page.
    pub inline_element_index: i64,
    /// Descoped locator of the image.
    pub locator: String,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
