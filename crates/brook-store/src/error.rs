use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.  Column conversion failures (bad JSON or timestamp
    /// text) surface here wrapped in `FromSqlConversionFailure`.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A targeted mutation affected zero rows.
    #[error("Record not found")]
    NotFound,

    /// A uniqueness constraint was violated (duplicate tag, confirmed
    /// credential, device hash, subscription).
    #[error("Duplicate record")]
    Duplicate,

    /// Rejected before any statement executed: an opaque identifier failed to
    /// decode or a required reference was empty.
    #[error("Malformed input: {0}")]
    Malformed(&'static str),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// True if the error is a SQLite UNIQUE (or primary key) constraint
/// violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Map a SQLite error, surfacing uniqueness violations as
/// [`StoreError::Duplicate`].
pub fn dupe_check(err: rusqlite::Error) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Duplicate
    } else {
        StoreError::Sqlite(err)
    }
}
