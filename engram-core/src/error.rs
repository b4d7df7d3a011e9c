//! Error kinds for the Engram core, grounded on `memory-core::error`.
//!
//! Each variant maps to one of the failure kinds in the error-handling design:
//! configuration errors are fatal at startup, transient I/O and lock
//! contention are caller-local retries, parse/validation errors drop the
//! offending item, downstream-service failures trigger backoff, and
//! invariant violations refuse the write rather than risk corruption.

/// Result type alias used throughout `engram-core`.
pub type Result<T> = std::result::Result<T, EngramError>;

/// The crate's error type.
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// Missing env var, unreadable DB path, or other startup misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure (file, socket, watcher).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON line, LLM response that did not fit the schema, etc.
    #[error("parse error: {0}")]
    Parse(String),

    /// The embedding model or LLM call failed.
    #[error("downstream service error: {0}")]
    Downstream(String),

    /// A `FileLock`/`PidGuard` could not be acquired before its deadline.
    #[error("lock contention: {0}")]
    LockContention(String),

    /// A data-model invariant (scope/project pairing, length cap, etc.) was
    /// about to be violated; the write was refused.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// The requested item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying SQLite/libsql failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON (de)serialization failure outside the "drop the item" parse path,
    /// e.g. writing a recollection file.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngramError {
    /// Whether the caller should retry with backoff rather than give up.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngramError::Config(_)
            | EngramError::Invariant(_)
            | EngramError::NotFound(_)
            | EngramError::Serialization(_) => false,
            EngramError::Io(_)
            | EngramError::Parse(_)
            | EngramError::Downstream(_)
            | EngramError::LockContention(_)
            | EngramError::Database(_) => true,
        }
    }
}

impl From<libsql::Error> for EngramError {
    fn from(e: libsql::Error) -> Self {
        EngramError::Database(e.to_string())
    }
}
