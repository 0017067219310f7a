//! Unsolicited blocks waiting for their predecessor.

use bitnode_consensus::{Block, BlockHash};

/// Bag of individually received blocks.
#[derive(Debug, Default)]
pub struct SoloBlockQueue {
    blocks: Vec<Block>,
}

impl SoloBlockQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block; duplicates are dropped. Returns whether it was added.
    pub fn push(&mut self, block: Block) -> bool {
        let hash = block.hash();
        if self.blocks.iter().any(|b| b.hash() == hash) {
            return false;
        }
        self.blocks.push(block);
        true
    }

    /// Take the block whose hash is `expected`, discarding applied ones.
    pub fn take_connecting(
        &mut self,
        expected: &BlockHash,
        is_applied: impl Fn(&BlockHash) -> bool,
    ) -> Option<Block> {
        self.blocks.retain(|b| !is_applied(&b.hash()));
        let pos = self.blocks.iter().position(|b| &b.hash() == expected)?;
        Some(self.blocks.swap_remove(pos))
    }

    /// Queued blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
