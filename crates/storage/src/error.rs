//! Storage error types and result alias.
//!
//! Every [`CacheStore`](crate::CacheStore) and [`UserDirectory`](crate::UserDirectory)
//! implementation maps its internal failures onto [`StorageError`]. Callers in the
//! authentication layer treat any of these as an infrastructure failure, so the
//! variants exist to aid diagnosis rather than to drive control flow.
//!
//! # Example
//!
//! ```
//! use tavern_storage::{StorageError, StorageResult};
//!
//! fn lookup(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(key))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during cache or directory operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested record was not found.
    #[error("Key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A write collided with existing data (duplicate id, email or API key).
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting field.
        message: String,
    },

    /// Connection or network error.
    ///
    /// The store could not be reached (connection refused, DNS failure,
    /// broken pipe). This is the error a Redis- or database-backed
    /// implementation returns when its dependency is down.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// Raised when a stored value cannot be interpreted, for example when
    /// [`increment`](crate::CacheStore::increment) finds a non-integer value.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal store error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` if retrying the operation may succeed.
    ///
    /// Connection failures and timeouts are transient. Missing keys,
    /// conflicts and corrupt values will fail the same way again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(StorageError::not_found("user:7").to_string(), "Key not found: user:7");
        assert_eq!(
            StorageError::conflict("email already registered").to_string(),
            "Conflict: email already registered"
        );
        assert_eq!(StorageError::timeout().to_string(), "Operation timeout");
    }

    #[test]
    fn transient_classification() {
        assert!(StorageError::connection("refused").is_transient());
        assert!(StorageError::timeout().is_transient());
        assert!(!StorageError::not_found("k").is_transient());
        assert!(!StorageError::serialization("not an integer").is_transient());
        assert!(!StorageError::conflict("dup").is_transient());
    }

    #[test]
    fn source_chain_is_preserved() {
        let err = StorageError::connection_with_source("cache unreachable", StorageError::Timeout);
        let source = err.source().expect("source exists");
        assert_eq!(source.to_string(), "Operation timeout");
    }
}
