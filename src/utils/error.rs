//! Error types for indexer operations.
//!
//! This module defines a single error enumeration using `thiserror` shared by
//! the decoder, the storage backends, the ledger sources and the engines.

use thiserror::Error;

/// Custom error type for indexer operations.
///
/// Covers every failure mode of the pipeline, from configuration issues to
/// block decoding and storage I/O. "Not found" outcomes are never reported
/// through this type; lookups return `Option` or an empty `Vec` instead.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Errors encountered during relational database operations.
    ///
    /// Wraps `sqlx::Error` through `#[from]` so `?` works on every query.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Backend-agnostic storage failures.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Errors while decoding a ledger block.
    ///
    /// The message names the sub-structure that failed to unmarshal
    /// (envelope, channel header, read/write-set, config payload, ...).
    /// A decoding error is fatal for the whole block.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Errors reported by the ledger source (fetch, subscribe, chain tip).
    #[error("Ledger error: {0}")]
    LedgerError(String),

    /// Connectivity failures towards the ledger or the storage.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Errors related to configuration.
    ///
    /// Missing environment variables, invalid channel names, or
    /// inconsistent builder settings.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Payload (de)serialization failures.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem failures of file-backed ledger sources.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors for operations that don't fit other categories.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// A worker kept failing with transient errors until the restart budget
    /// was spent.
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Total number of attempts (initial run + restarts).
        attempts: u32,
        /// String representation of the last error.
        last_error: String,
    },
}

/// Type alias for Results using `IndexerError`.
pub type Result<T> = std::result::Result<T, IndexerError>;

impl From<prost::DecodeError> for IndexerError {
    fn from(err: prost::DecodeError) -> Self {
        IndexerError::DecodingError(err.to_string())
    }
}
