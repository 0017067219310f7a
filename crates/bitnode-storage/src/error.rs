//! Error types for the storage layer.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corruption detected.
    #[error("Data corruption detected: {0}")]
    Corrupted(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
