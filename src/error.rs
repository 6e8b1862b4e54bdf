//! Error types for the query engine

use thiserror::Error;

/// Main error type for the engine
///
/// Parse and validation failures abort the whole request before any task is
/// scheduled; storage failures are confined to the task that hit them and
/// degrade that task to an empty output.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing request input; maps to HTTP 400
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Storage error propagated from below
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialized response exceeds the configured size limit; maps to HTTP 413
    #[error("response too large: {size} bytes exceeds limit of {limit}")]
    ResponseTooLarge {
        /// Size the response would have had
        size: usize,
        /// Configured limit in bytes
        limit: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Executor is shutting down and rejects new work
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation or unexpected internal state
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage errors
///
/// Raised by shard and series reads; callers inside the execution pipeline
/// log these and continue with an empty task output.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shard was closed while a query still referenced it
    #[error("shard closed: {0}")]
    ShardClosed(String),

    /// Data is corrupted
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// Requested series not found
    #[error("series not found: {0}")]
    SeriesNotFound(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
