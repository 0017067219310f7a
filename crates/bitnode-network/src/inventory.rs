//! Inventory vectors for block requests.

use bitnode_consensus::BlockHash;
use std::fmt;

/// What kind of object an inventory asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryType {
    /// Block without witness data.
    Block,
    /// Block including segregated witness data.
    WitnessBlock,
}

impl InventoryType {
    /// Wire type code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Block => 2,
            Self::WitnessBlock => 0x4000_0002,
        }
    }
}

/// A typed request for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inventory {
    /// Requested object type.
    pub inv_type: InventoryType,
    /// Block hash.
    pub hash: BlockHash,
}

impl Inventory {
    /// Plain block request.
    pub fn block(hash: BlockHash) -> Self {
        Self {
            inv_type: InventoryType::Block,
            hash,
        }
    }

    /// Witness block request.
    pub fn witness_block(hash: BlockHash) -> Self {
        Self {
            inv_type: InventoryType::WitnessBlock,
            hash,
        }
    }
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inv_type {
            InventoryType::Block => write!(f, "block:{}", self.hash),
            InventoryType::WitnessBlock => write!(f, "witness-block:{}", self.hash),
        }
    }
}
