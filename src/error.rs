//! Error types for the crate.
//!
//! All fallible operations return [`Result`]. The [`Error`] enum is the
//! boundary error surface: each variant carries a stable code (see
//! [`Error::code`]), a human-readable message, and whatever structured
//! context the failure has.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by indexing and search operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Filesystem or database I/O failure. Per-file I/O errors during
    /// scanning are logged and skipped; store-level failures abort the
    /// current pipeline stage.
    #[error("I/O error: {0}")]
    Io(String),

    /// A vector's length disagrees with the configured embedding dimensions.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was configured with
        expected: usize,
        /// Dimension actually received
        actual: usize,
    },

    /// A document id was added while already present in the index.
    #[error("duplicate document id: {0}")]
    DuplicateId(String),

    /// A persisted artifact (database or vector snapshot) failed validation
    /// on load. Recoverable by discarding the artifact and rebuilding from
    /// source.
    #[error("index corruption: {0}")]
    IndexCorruption(String),

    /// An embedding provider call failed.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// The operation was cancelled cooperatively. Not an error condition for
    /// callers who requested the cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration (nonexistent root, unknown provider name, ...).
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::DuplicateId(_) => "duplicate_id",
            Error::IndexCorruption(_) => "index_corruption",
            Error::Provider(_) => "provider",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "config",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                Error::IndexCorruption(e.to_string())
            }
            _ => Error::Io(e.to_string()),
        }
    }
}
