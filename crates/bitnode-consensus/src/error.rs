//! Error types for consensus primitives.

use thiserror::Error;

/// Consensus errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Serialized header has the wrong length.
    #[error("Invalid header length: got {got} bytes, expected {expected}")]
    InvalidHeaderLength { got: usize, expected: usize },

    /// Compact target has the sign bit set.
    #[error("Negative compact target: {0:#010x}")]
    NegativeTarget(u32),

    /// Compact target does not fit in 256 bits.
    #[error("Compact target overflows 256 bits: {0:#010x}")]
    TargetOverflow(u32),

    /// Compact target decodes to zero.
    #[error("Zero compact target: {0:#010x}")]
    ZeroTarget(u32),

    /// Target above the network proof-of-work limit.
    #[error("Target {bits:#010x} above proof-of-work limit")]
    AboveProofOfWorkLimit { bits: u32 },

    /// Unrecognised network name.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// Malformed hex string.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
