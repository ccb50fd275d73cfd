//! Error types for Taskflow operations

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// How the cache layer must react to a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Expected to resolve on retry. Serve last-known-good data.
    Transient,
    /// The session is missing or invalid. Never serve cached data.
    Unauthorized,
    /// The remote collaborator rejected the request permanently.
    Rejected,
}

/// Failures reported by the hosted backend (auth, REST, storage).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Rate limited by upstream{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Service unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}ms", d.as_millis()),
        None => String::new(),
    }
}

impl RemoteError {
    /// Classify this failure for the cache's fallback policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::RateLimited { .. }
            | RemoteError::MalformedResponse { .. }
            | RemoteError::Timeout
            | RemoteError::Unavailable { .. }
            | RemoteError::Network { .. } => ErrorClass::Transient,
            RemoteError::Unauthorized { .. } => ErrorClass::Unauthorized,
            RemoteError::NotFound { .. }
            | RemoteError::Validation { .. }
            | RemoteError::PermissionDenied { .. } => ErrorClass::Rejected,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_unauthorized(&self) -> bool {
        self.class() == ErrorClass::Unauthorized
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }
}

/// Durable mirror failures. These never fail a logical cache operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Failed to open mirror: {reason}")]
    Open { reason: String },

    #[error("Mirror transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Mirror serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Mirror I/O error: {reason}")]
    Io { reason: String },
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        MirrorError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Errors returned by the read-through coordinator and the optimistic mutator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Nothing cached for {key}")]
    NothingCached { key: String },

    #[error("Record {id} is not in the cached collection for {key}")]
    RecordMissing { key: String, id: Uuid },
}

impl CacheError {
    /// The remote failure behind this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CacheError::Remote(e) => Some(e),
            _ => None,
        }
    }

    /// True when the caller should send the user back to sign-in.
    pub fn requires_sign_in(&self) -> bool {
        self.remote().is_some_and(RemoteError::is_unauthorized)
    }
}

/// Master error type for all Taskflow errors.
#[derive(Debug, Clone, Error)]
pub enum TaskflowError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),
}

/// Result type alias for Taskflow operations.
pub type TaskflowResult<T> = Result<T, TaskflowError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
