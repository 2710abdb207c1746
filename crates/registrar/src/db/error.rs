//! Error types for the persistence store.

use super::types::SectionId;
use thiserror::Error;

/// Errors raised by [`super::EnrollmentDb`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database file could not be opened or initialised
    #[error("Failed to open database at {path}: {message}")]
    Open { path: String, message: String },

    /// A query or statement failed
    #[error("Database query failed: {message}")]
    Query { message: String },

    /// A uniqueness constraint rejected the write
    #[error("Unique constraint violated: {message}")]
    UniqueViolation { message: String },

    /// A stored row could not be decoded
    #[error("Corrupt row: {message}")]
    CorruptRow { message: String },

    /// The connection pool mutex was poisoned by a panicking holder
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// Administrative write against a section that does not exist
    #[error("Section {section} does not exist")]
    UnknownSection { section: SectionId },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg.as_deref().is_some_and(|m| m.contains("UNIQUE")) =>
            {
                StoreError::UniqueViolation {
                    message: msg.unwrap_or_default(),
                }
            }
            rusqlite::Error::FromSqlConversionFailure(_, _, inner) => StoreError::CorruptRow {
                message: inner.to_string(),
            },
            other => StoreError::Query {
                message: other.to_string(),
            },
        }
    }
}
