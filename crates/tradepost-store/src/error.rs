use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error. Surfaced to the caller, never retried here.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was rejected before anything was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Stored data violates a schema invariant.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        StoreError::NotFound(what.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
