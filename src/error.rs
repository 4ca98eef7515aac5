//! Application error types for fpl-sync
//!
//! This module defines the error taxonomy shared by the upstream client,
//! the cache layer, the durable store and the batch orchestrator.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::models::EntityId;

/// Coarse failure class of an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpFailureKind {
    /// No response: connection refused, reset, DNS failure
    Network,
    /// No response within the attempt timeout
    Timeout,
    /// 4xx response (other than 429)
    ClientError,
    /// 5xx response
    ServerError,
    /// Throttled, either by upstream (429) or by the local token bucket
    RateLimited,
}

impl std::fmt::Display for HttpFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpFailureKind::Network => "network",
            HttpFailureKind::Timeout => "timeout",
            HttpFailureKind::ClientError => "client_error",
            HttpFailureKind::ServerError => "server_error",
            HttpFailureKind::RateLimited => "rate_limited",
        };
        write!(f, "{}", s)
    }
}

/// Local token bucket refused a request
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Rate limit exceeded: {remaining_tokens} tokens remaining, next refill in {next_refill_in_ms}ms")]
pub struct RateLimitExceeded {
    /// Tokens left in the bucket at the time of the refusal
    pub remaining_tokens: f64,
    /// Milliseconds until the next refill step
    pub next_refill_in_ms: u64,
}

/// Upstream call errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HttpError {
    /// Malformed request input (bad path, unserializable body)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Transport failure with no response
    #[error("Network error: {0}")]
    Network(String),

    /// Attempt timed out
    #[error("Request timed out")]
    Timeout,

    /// 4xx response
    #[error("Client error: HTTP {status}")]
    ClientError {
        /// Response status code
        status: u16,
    },

    /// 5xx response
    #[error("Server error: HTTP {status}")]
    ServerError {
        /// Response status code
        status: u16,
    },

    /// HTTP 429 from upstream
    #[error("Rate limited by upstream (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Parsed Retry-After header, if present
        retry_after_secs: Option<u64>,
    },

    /// Local token bucket exhausted
    #[error(transparent)]
    RateLimitExceeded(#[from] RateLimitExceeded),

    /// All attempts failed; wraps the last failure
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The failure of the final attempt
        last: Box<HttpError>,
    },

    /// 2xx response whose body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl HttpError {
    /// Failure class of this error
    pub fn kind(&self) -> HttpFailureKind {
        match self {
            HttpError::Network(_) => HttpFailureKind::Network,
            HttpError::Timeout => HttpFailureKind::Timeout,
            HttpError::ServerError { .. } => HttpFailureKind::ServerError,
            HttpError::RateLimited { .. } | HttpError::RateLimitExceeded(_) => {
                HttpFailureKind::RateLimited
            }
            HttpError::RetryExhausted { last, .. } => last.kind(),
            HttpError::ClientError { .. } | HttpError::Validation(_) | HttpError::Decode(_) => {
                HttpFailureKind::ClientError
            }
        }
    }

    /// Response status, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::ClientError { status } | HttpError::ServerError { status } => Some(*status),
            HttpError::RateLimited { .. } => Some(429),
            HttpError::RetryExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Cache-related errors
///
/// These never reach callers of the read-through path; they are logged
/// and the read falls through to the loader.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    /// Backend round-trip failed
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Async connection error
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Per-entity synchronization errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Upstream call failed
    #[error("Upstream error: {0}")]
    Http(#[from] HttpError),

    /// Durable store failed
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Upstream payload did not match expectations
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Entity does not exist upstream
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    /// Job queue is no longer accepting work
    #[error("Sync queue closed")]
    QueueClosed,

    /// The entity's sync task panicked or was cancelled
    #[error("Sync task aborted: {0}")]
    Aborted(String),
}

/// Failed subset of a batch run
///
/// Produced from a `SyncOutcome`; drives re-enqueueing and is never
/// returned as an error by the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{} of {total} entities failed to sync", failed_ids.len())]
pub struct PartialBatchFailure {
    /// Number of entities in the batch
    pub total: usize,
    /// Entities whose sync failed
    pub failed_ids: Vec<EntityId>,
}

/// Application-level error type
///
/// This is the error type used by the binary and by bootstrap code.
/// It aggregates all domain-specific error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Upstream error
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            HttpError::Network(_) => true,
            HttpError::Timeout => true,
            HttpError::ServerError { .. } => true,
            HttpError::RateLimited { .. } => true,
            HttpError::RateLimitExceeded(_) => true,

            // Non-retryable errors
            HttpError::Validation(_) => false,
            HttpError::ClientError { .. } => false,
            HttpError::Decode(_) => false,
            HttpError::RetryExhausted { .. } => false,
        }
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::Http(e) => e.is_retryable(),
            SyncError::Database(_) => true,
            SyncError::InvalidData(_)
            | SyncError::NotFound(_)
            | SyncError::QueueClosed
            | SyncError::Aborted(_) => false,
        }
    }
}
