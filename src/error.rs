use thiserror::Error;

/// Main error type for the reader engine.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Chapter, page or record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Chapter markup could not be parsed.
    #[error("Invalid markup: {0}")]
    InvalidMarkup(#[from] roxmltree::Error),

    /// Structural locator could not be parsed or resolved.
    #[error("Locator error: {0}")]
    Locator(String),

    /// External collaborator (content, progress or bookmark API) failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Local store error.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reader session was closed.
    #[error("Reader session is closed")]
    Closed,
}

impl From<rusqlite::Error> for ReaderError {
    fn from(e: rusqlite::Error) -> Self {
        ReaderError::Database(e.to_string())
    }
}

/// Result type alias for the reader engine.
pub type Result<T> = std::result::Result<T, ReaderError>;
