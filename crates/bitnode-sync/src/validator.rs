//! Block validation seam.
//!
//! Script, signature and UTXO rules live behind [`BlockValidator`]; the sync
//! core only decides when a block is ready and what to do with the verdict.

use bitnode_consensus::{verify_header_target, Block, BlockHash, BlockHeader, Target};
use thiserror::Error;

/// A block failed consensus validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Block {hash} invalid at height {height}: {reason}")]
pub struct BlockValidationError {
    /// Rejected block.
    pub hash: BlockHash,
    /// Height it was validated for.
    pub height: u32,
    /// Validator's explanation.
    pub reason: String,
}

/// External consensus-rule engine.
pub trait BlockValidator: Send + Sync {
    /// Check a header's proof of work against the expected target.
    fn verify_header(&self, header: &BlockHeader, expected: &Target) -> bool {
        verify_header_target(header, expected)
    }

    /// Validate a block as the block at `height`.
    fn verify_block(&self, block: &Block, height: u32) -> Result<(), BlockValidationError>;

    /// Called once the block at `height` has been stored and is the new tip.
    fn block_connected(&self, _block: &Block, _height: u32) {}
}
