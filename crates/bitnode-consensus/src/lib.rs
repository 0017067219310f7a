//! # bitnode-consensus
//!
//! Consensus primitives for a Bitcoin-style header chain.
//!
//! This crate provides:
//! - 80-byte block headers with cached double-SHA256 identity
//! - Compact (nBits) target encoding and proof-of-work checks
//! - Difficulty retargeting and median time past
//! - Per-network parameters and genesis blocks
//!
//! ## Difficulty Adjustment
//!
//! Every 2016 blocks the target is scaled by the actual duration of the
//! previous interval over two weeks, with the ratio clamped to `[1/4, 4]`
//! and the result capped at the network proof-of-work limit.

mod chain_params;
mod difficulty;
mod error;
mod header;
mod target;

pub use chain_params::{ChainParams, Network};
pub use difficulty::{median_time_past, DifficultyOracle};
pub use error::{ConsensusError, ConsensusResult};
pub use header::{double_sha256, Block, BlockHash, BlockHeader, HEADER_SIZE};
pub use target::{check_proof_of_work, verify_header_target, Target};

/// Network-independent consensus constants.
pub mod params {
    pub use crate::chain_params::{MAX_FUTURE_BLOCK_TIME, TARGET_SPACING, TARGET_TIMESPAN};
    pub use crate::difficulty::MEDIAN_TIME_SPAN;
}
