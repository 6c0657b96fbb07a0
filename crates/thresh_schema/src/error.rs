//! Engine error taxonomy.
//!
//! Expected conditions (not-found, conflict, invalid transition) are typed
//! variants callers branch on. Per-file verification failures inside the
//! cleaner are recorded on the task and never abort a batch; the
//! `Verification` variant exists for the single-file operations that surface
//! them directly.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced group/file/job is absent (or a selector matched nothing).
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation lost to a concurrent writer or targets a group already
    /// being cleaned.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The group's current status does not permit the requested transition.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// File missing on disk or content hash drifted since indexing.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Malformed preference, pattern, or selector input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected database failure - propagates and fails the operation,
    /// which is retryable by design.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Archive store I/O failure outside the per-file boundary.
    #[error("archive error: {0}")]
    Archive(#[from] std::io::Error),

    /// Runtime failure that should not happen (worker task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        EngineError::Conflict(what.into())
    }

    pub fn invalid_transition(what: impl Into<String>) -> Self {
        EngineError::InvalidTransition(what.into())
    }
}

/// Parse error for the canonical enums. Kept as a real error type so sqlx
/// row decoding can box it.
#[derive(Debug, Clone, Error)]
#[error("invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
