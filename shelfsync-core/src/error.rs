//! Error types for Shelfsync Core

use std::time::Duration;
use thiserror::Error;

use crate::transfer::Direction;
use crate::types::BookHash;

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error type for all Shelfsync operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors computing or validating a content-derived book identity
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Book content is unreadable: {0}")]
    Unreadable(String),

    #[error("Book content is empty")]
    Empty,

    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: BookHash, actual: BookHash },

    #[error("Invalid book hash: {0}")]
    InvalidHash(String),
}

/// Errors resolving book metadata
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Metadata unavailable for {hash}: {reason}")]
    Unavailable { hash: BookHash, reason: String },

    #[error("Metadata resolution for {hash} timed out after {after:?}")]
    Timeout { hash: BookHash, after: Duration },
}

/// Errors that occur while opening a document for metadata
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("Invalid MOBI: {0}")]
    InvalidMobi(String),

    #[error("Unsupported format")]
    UnsupportedFormat,
}

/// Rejections of a transfer request
///
/// These are reported synchronously to the caller; a rejected request never
/// enters the queue.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Unknown book: {0}")]
    UnknownBook(BookHash),

    #[error("A {direction} is already active for {hash}")]
    TransferActive { hash: BookHash, direction: Direction },

    #[error("Book {0} is already uploaded")]
    AlreadyUploaded(BookHash),

    #[error("Book {0} is already downloaded")]
    AlreadyDownloaded(BookHash),

    #[error("Book {0} has not been uploaded yet")]
    NotUploadedYet(BookHash),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Transfer engine is shut down")]
    ShutDown,
}

impl TransferError {
    /// Whether this rejection is a per-book precondition violation rather
    /// than an environmental failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            TransferError::TransferActive { .. }
                | TransferError::AlreadyUploaded(_)
                | TransferError::AlreadyDownloaded(_)
                | TransferError::NotUploadedYet(_)
                | TransferError::UnknownBook(_)
        )
    }
}

/// Errors reported by a remote store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited by remote")]
    RateLimited,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Not found on remote: {0}")]
    NotFound(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Backend error: {0}")]
    Backend(String),
}

impl RemoteError {
    /// Transient errors are retried with backoff before a job fails
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Unavailable(_) | RemoteError::RateLimited
        )
    }
}

/// Errors that occur during storage operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Path escapes storage root: {0}")]
    InvalidPath(String),

    #[error("Backend error: {0}")]
    BackendError(String),
}

impl From<StorageError> for RemoteError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => RemoteError::NotFound(path),
            StorageError::PermissionDenied(msg) => RemoteError::Unauthorized(msg),
            StorageError::InvalidPath(path) => {
                RemoteError::Backend(format!("path escapes storage root: {}", path))
            }
            StorageError::BackendError(msg) => RemoteError::Unavailable(msg),
        }
    }
}

/// Errors loading or saving the library snapshot
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed library file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors in engine configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::RateLimited.is_transient());
        assert!(!RemoteError::Unauthorized("denied".into()).is_transient());
        assert!(!RemoteError::QuotaExceeded("full".into()).is_transient());
        assert!(!RemoteError::Cancelled.is_transient());
    }

    #[test]
    fn test_storage_error_maps_to_remote() {
        let err: RemoteError = StorageError::PermissionDenied("ro".into()).into();
        assert_eq!(err, RemoteError::Unauthorized("ro".into()));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_invalid_path_is_permanent() {
        let err: RemoteError = StorageError::InvalidPath("../outside".into()).into();
        assert!(matches!(err, RemoteError::Backend(_)));
        assert!(!err.is_transient());

        let err: RemoteError = StorageError::BackendError("disk busy".into()).into();
        assert!(err.is_transient());
    }
}
