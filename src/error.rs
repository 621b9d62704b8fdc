//! Crate-level error types.
//!
//! [`BarfeedError`] covers the precondition and I/O failures that callers
//! are expected to react to. Bad market data (stale ticks, corrupt cache
//! files, broker disagreement) never shows up here: it is logged and dropped
//! where it is found.

use std::time::Duration;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BarfeedError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum BarfeedError {
    /// Configuration could not be read or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A realtime channel already exists for the symbol.
    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    /// No realtime channel exists for the symbol.
    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The server answered 429; retry no earlier than `retry_after`.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The broker reported a failure for a query.
    #[error("broker error: {0}")]
    Broker(String),

    /// An HTTP request failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Reading or writing a cache file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
