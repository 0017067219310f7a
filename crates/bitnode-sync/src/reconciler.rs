//! Per-peer buffers of downloaded blocks awaiting their turn.

use bitnode_consensus::{Block, BlockHash};
use bitnode_network::{Inventory, PeerId, PeerSession};
use std::collections::VecDeque;
use std::sync::Arc;

struct PeerEntry {
    peer: Arc<PeerSession>,
    // Inventory and block are paired so the two can never drift apart.
    blocks: VecDeque<(Inventory, Block)>,
}

/// Blocks a peer delivered in request order, held until the tip reaches
/// their predecessor.
#[derive(Default)]
pub struct PeerBlockReconciler {
    entries: Vec<PeerEntry>,
}

impl PeerBlockReconciler {
    /// No buffered blocks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a block delivered for `inv`.
    pub fn push(&mut self, peer: &Arc<PeerSession>, inv: Inventory, block: Block) {
        match self.entries.iter_mut().find(|e| e.peer.id() == peer.id()) {
            Some(entry) => entry.blocks.push_back((inv, block)),
            None => self.entries.push(PeerEntry {
                peer: Arc::clone(peer),
                blocks: VecDeque::from([(inv, block)]),
            }),
        }
    }

    /// Drop leading blocks that are already applied, then take the entry
    /// head whose hash is `expected`.
    pub fn take_connecting(
        &mut self,
        expected: &BlockHash,
        is_applied: impl Fn(&BlockHash) -> bool,
    ) -> Option<(Arc<PeerSession>, Inventory, Block)> {
        for entry in &mut self.entries {
            while entry
                .blocks
                .front()
                .map_or(false, |(inv, _)| is_applied(&inv.hash))
            {
                entry.blocks.pop_front();
            }
        }
        self.entries.retain(|e| !e.blocks.is_empty());

        let pos = self
            .entries
            .iter()
            .position(|e| e.blocks.front().map_or(false, |(inv, _)| &inv.hash == expected))?;
        let entry = &mut self.entries[pos];
        let peer = Arc::clone(&entry.peer);
        let (inv, block) = entry.blocks.pop_front()?;
        if entry.blocks.is_empty() {
            self.entries.remove(pos);
        }
        Some((peer, inv, block))
    }

    /// Remove a peer's entry, returning the inventories of its unapplied
    /// blocks in order.
    pub fn remove_peer(&mut self, peer: &PeerId) -> Vec<Inventory> {
        match self.entries.iter().position(|e| &e.peer.id() == peer) {
            Some(pos) => self
                .entries
                .remove(pos)
                .blocks
                .into_iter()
                .map(|(inv, _)| inv)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Blocks buffered for one peer.
    pub fn queued_for(&self, peer: &PeerId) -> usize {
        self.entries
            .iter()
            .find(|e| &e.peer.id() == peer)
            .map_or(0, |e| e.blocks.len())
    }

    /// Blocks buffered across all peers.
    pub fn queued_blocks(&self) -> usize {
        self.entries.iter().map(|e| e.blocks.len()).sum()
    }

    /// Peers with buffered blocks.
    pub fn peer_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_for, mine_headers};
    use bitnode_consensus::ChainParams;

    #[test]
    fn test_take_connecting_in_entry_order() {
        let headers = mine_headers(&ChainParams::regtest().genesis, 4, 600);
        let blocks: Vec<Block> = headers.iter().map(block_for).collect();
        let a = Arc::new(PeerSession::new(PeerId(1), true));
        let b = Arc::new(PeerSession::new(PeerId(2), true));

        let mut reconciler = PeerBlockReconciler::new();
        // Peer b holds the later pair, peer a the earlier one
        reconciler.push(&b, Inventory::block(blocks[2].hash()), blocks[2].clone());
        reconciler.push(&b, Inventory::block(blocks[3].hash()), blocks[3].clone());
        reconciler.push(&a, Inventory::block(blocks[0].hash()), blocks[0].clone());
        reconciler.push(&a, Inventory::block(blocks[1].hash()), blocks[1].clone());
        assert_eq!(reconciler.queued_blocks(), 4);

        let never = |_: &BlockHash| false;
        assert!(reconciler.take_connecting(&blocks[1].hash(), never).is_none());

        let mut order = Vec::new();
        for block in &blocks {
            let (peer, inv, got) = reconciler.take_connecting(&block.hash(), never).unwrap();
            assert_eq!(inv.hash, got.hash());
            order.push(peer.id());
        }
        assert_eq!(order, vec![PeerId(1), PeerId(1), PeerId(2), PeerId(2)]);
        assert_eq!(reconciler.peer_count(), 0);
    }

    #[test]
    fn test_applied_heads_are_dropped() {
        let headers = mine_headers(&ChainParams::regtest().genesis, 2, 600);
        let blocks: Vec<Block> = headers.iter().map(block_for).collect();
        let peer = Arc::new(PeerSession::new(PeerId(3), false));

        let mut reconciler = PeerBlockReconciler::new();
        reconciler.push(&peer, Inventory::block(blocks[0].hash()), blocks[0].clone());
        reconciler.push(&peer, Inventory::block(blocks[1].hash()), blocks[1].clone());

        let applied = blocks[0].hash();
        let got = reconciler.take_connecting(&blocks[1].hash(), |h| *h == applied);
        assert!(got.is_some());
        assert_eq!(reconciler.queued_blocks(), 0);
    }

    #[test]
    fn test_remove_peer_returns_inventories() {
        let headers = mine_headers(&ChainParams::regtest().genesis, 2, 600);
        let peer = Arc::new(PeerSession::new(PeerId(4), false));
        let mut reconciler = PeerBlockReconciler::new();
        for header in &headers {
            let block = block_for(header);
            reconciler.push(&peer, Inventory::witness_block(block.hash()), block);
        }
        assert_eq!(reconciler.queued_for(&PeerId(4)), 2);

        let invs = reconciler.remove_peer(&PeerId(4));
        assert_eq!(invs.len(), 2);
        assert_eq!(invs[0].hash, headers[0].hash());
        assert!(reconciler.remove_peer(&PeerId(4)).is_empty());
    }
}
