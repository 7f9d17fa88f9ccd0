//! Error types for the sync pipeline.
//!
//! Errors are classified as transient or permanent; the retry layer only
//! re-attempts transient failures.

use thiserror::Error;

/// Result type alias using `SyncError`.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing role assignments.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Token exchange failed or the directory rejected a freshly issued token.
    /// Fatal for the affected tenant.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The directory service throttled the request (429).
    #[error("rate limited by the directory service")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Timeout, connection failure, or a transient upstream status (502/503/504).
    #[error("transient error: {0}")]
    Transient(String),

    /// Resource deleted between listing and lookup. The affected user is
    /// skipped, not fatal.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Non-retryable directory API error.
    #[error("directory API error: status {status} - {message}")]
    Api { status: u16, message: String },

    /// Retry budget exhausted for a single call.
    #[error("maximum retries ({attempts}) exceeded")]
    MaxRetriesExceeded { attempts: u32 },

    /// Warehouse query or insert call failure.
    #[error("warehouse error: {0}")]
    Warehouse(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Returns true if the error is worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
