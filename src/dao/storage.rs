use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database or cache.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or rejected the request for infrastructure reasons.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Context describing the failed operation.
        message: String,
        /// Backend-specific failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A uniqueness or referential constraint rejected the write.
    #[error("integrity violation: {message}")]
    Integrity {
        /// Description of the violated constraint.
        message: String,
    },
    /// A stored value could not be decoded into its typed representation.
    #[error("corrupted value under `{key}`")]
    Corrupted {
        /// Key (and field, when relevant) holding the undecodable value.
        key: String,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        StorageError::Integrity {
            message: message.into(),
        }
    }

    /// Construct a corruption error for the given key.
    pub fn corrupted(key: impl Into<String>, source: serde_json::Error) -> Self {
        StorageError::Corrupted {
            key: key.into(),
            source,
        }
    }
}
