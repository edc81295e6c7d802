//! Unified error types for harvest.
//!
//! Live-fetch failures are described by a closed [`FailureKind`] so the retry
//! boundary is decided by an exhaustive match rather than by error downcasting.

use std::fmt;

use tokio_rusqlite::rusqlite;

/// Why a single live fetch attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation did not complete in time.
    Timeout,
    /// An element the page should contain has not been rendered yet.
    ElementNotFound,
    /// The page mutated between locating an element and using it.
    StaleReference,
    /// The remote source demands a login.
    AuthRequired,
    /// The target does not exist.
    NotFound,
    /// The request itself is invalid.
    MalformedRequest,
    /// The browser or session backing the fetcher is gone.
    Unavailable,
}

impl FailureKind {
    /// Every kind, in declaration order.
    pub const ALL: [FailureKind; 7] = [
        FailureKind::Timeout,
        FailureKind::ElementNotFound,
        FailureKind::StaleReference,
        FailureKind::AuthRequired,
        FailureKind::NotFound,
        FailureKind::MalformedRequest,
        FailureKind::Unavailable,
    ];

    /// Whether a failure of this kind is expected to resolve by retrying.
    pub const fn is_transient(self) -> bool {
        match self {
            FailureKind::Timeout | FailureKind::ElementNotFound | FailureKind::StaleReference => true,
            FailureKind::AuthRequired
            | FailureKind::NotFound
            | FailureKind::MalformedRequest
            | FailureKind::Unavailable => false,
        }
    }

    /// Stable upper-case code used in messages and logs.
    pub const fn code(self) -> &'static str {
        match self {
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::ElementNotFound => "ELEMENT_NOT_FOUND",
            FailureKind::StaleReference => "STALE_REFERENCE",
            FailureKind::AuthRequired => "AUTH_REQUIRED",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::MalformedRequest => "MALFORMED_REQUEST",
            FailureKind::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed fetch attempt as reported by a page fetcher or a wait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn element_not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ElementNotFound, message)
    }

    pub fn stale_reference(message: impl Into<String>) -> Self {
        Self::new(FailureKind::StaleReference, message)
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AuthRequired, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedRequest, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Unified error type for cache, retry and fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The request target could not be turned into a cache key.
    #[error("INVALID_TARGET: {0}")]
    InvalidTarget(String),

    /// A permanent fetch failure, surfaced after a single attempt.
    #[error("FETCH_FAILED: {key}: {failure}")]
    FetchFailed { key: String, failure: FetchFailure },

    /// Every allowed attempt failed with a transient failure.
    #[error("RETRIES_EXHAUSTED: {key} after {attempts} attempts: {last}")]
    RetriesExhausted { key: String, attempts: u32, last: FetchFailure },

    /// The caller's deadline elapsed before the fetch could succeed.
    #[error("DEADLINE_EXCEEDED: {key} after {attempts} attempts")]
    DeadlineExceeded { key: String, attempts: u32, last: Option<FetchFailure> },

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Filesystem failure while exporting or importing.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// Payload or export (de)serialization failed.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("CACHE_ERROR: corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
}

impl Error {
    /// Whether this error comes from the persistent store rather than the remote source.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::MigrationFailed(_) | Error::Io(_) | Error::CorruptRecord { .. }
        )
    }

    /// The failure kind behind a fetch error, if any.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::FetchFailed { failure, .. } => Some(failure.kind),
            Error::RetriesExhausted { last, .. } => Some(last.kind),
            Error::DeadlineExceeded { last, .. } => last.as_ref().map(|f| f.kind),
            _ => None,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
