//! Sync error types.

use thiserror::Error;

/// Sync errors.
///
/// Peer misbehavior and invalid blocks are outcomes, not errors; only local
/// storage failures surface here.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] bitnode_storage::StorageError),

    /// Consensus error.
    #[error("Consensus error: {0}")]
    Consensus(#[from] bitnode_consensus::ConsensusError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
