//! Test data generators.

use bitnode_consensus::{BlockHash, BlockHeader, ChainParams};
use bitnode_network::{PeerId, PeerSession};
use bitnode_sync::test_utils::{mine_header, mine_headers};
use std::sync::Arc;

/// Regtest header spacing used by the generators.
pub const SPACING: u32 = 600;

/// `count` regtest headers on top of genesis.
pub fn regtest_headers(count: usize) -> Vec<BlockHeader> {
    mine_headers(&ChainParams::regtest().genesis, count, SPACING)
}

/// A branch of `count` headers forking off `base`. The merkle tag differs
/// from anything [`regtest_headers`] produces, so the hashes never collide.
pub fn fork_headers(base: &BlockHeader, count: usize) -> Vec<BlockHeader> {
    if count == 0 {
        return Vec::new();
    }
    let first = mine_header(base, base.time + SPACING, base.bits, 0xF0F0_0000);
    let mut branch = vec![first.clone()];
    branch.extend(mine_headers(&first, count - 1, SPACING));
    branch
}

/// Deterministic hash for tracker-level tests.
pub fn test_hash(seed: u32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&seed.to_le_bytes());
    bytes[31] = 0xB1;
    BlockHash::from(bytes)
}

/// New witness-capable peer session.
pub fn witness_peer() -> Arc<PeerSession> {
    Arc::new(PeerSession::new(PeerId::next(), true))
}

/// New peer session without witness support.
pub fn legacy_peer() -> Arc<PeerSession> {
    Arc::new(PeerSession::new(PeerId::next(), false))
}
