//! Error types for the port-binding arbitration shim
//!
//! This module defines all error types used throughout the crate.
//!
//! The coordination-store error kinds (`KeyNotFound`, `WatchTimedOut`,
//! `StoreUnavailable`) are part of the store contract: callers branch on
//! them to decide between "absent", "retry" and "fail fast".

use thiserror::Error;

/// Result type alias for shim operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the shim system
#[derive(Error, Debug)]
pub enum Error {
    /// A coordination-store key does not exist
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A blocking watch read reached its per-attempt wait bound
    #[error("watch timed out")]
    WatchTimedOut,

    /// The coordination store cannot be reached
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other coordination-store failure
    #[error("coordination store error: {0}")]
    Store(String),

    /// A record does not exist in the record store
    #[error("record not found: {table}/{key}")]
    RecordNotFound {
        /// Table the record was looked up in
        table: String,
        /// Primary key of the record
        key: String,
    },

    /// Record-store failures other than a missing record
    #[error("record store error: {0}")]
    RecordStore(String),

    /// Backend driver failure
    #[error("backend error ({driver}): {message}")]
    Backend {
        /// Driver name
        driver: String,
        /// Error message
        message: String,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a key-not-found error
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound(key.into())
    }

    /// Create a store-unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a generic coordination-store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a record-not-found error
    pub fn record_not_found(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Create a record-store error
    pub fn record_store(msg: impl Into<String>) -> Self {
        Self::RecordStore(msg.into())
    }

    /// Create a backend driver error
    pub fn backend(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            driver: driver.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for the error kinds every watcher is expected to see during
    /// normal operation (timeouts and store hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WatchTimedOut | Self::StoreUnavailable(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
