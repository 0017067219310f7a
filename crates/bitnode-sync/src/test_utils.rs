//! Test doubles and chain builders.

use crate::clock::Clock;
use crate::validator::{BlockValidationError, BlockValidator};
use bitnode_consensus::{Block, BlockHash, BlockHeader, Target};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock reading `now`.
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Validator that accepts every block except those explicitly marked bad.
///
/// Header checks use the real proof-of-work rules.
#[derive(Debug, Default)]
pub struct MockValidator {
    rejected: Mutex<HashSet<BlockHash>>,
    panicking: Mutex<HashSet<BlockHash>>,
    verified: Mutex<Vec<(u32, BlockHash)>>,
    connected: Mutex<Vec<(u32, BlockHash)>>,
}

impl MockValidator {
    /// Accept-everything validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail validation of `hash` from now on.
    pub fn reject(&self, hash: BlockHash) {
        self.rejected.lock().insert(hash);
    }

    /// Panic the next time `hash` is verified.
    pub fn panic_once(&self, hash: BlockHash) {
        self.panicking.lock().insert(hash);
    }

    /// Accept `hash` again.
    pub fn accept(&self, hash: &BlockHash) {
        self.rejected.lock().remove(hash);
    }

    /// Every `(height, hash)` passed to `verify_block`, in call order.
    pub fn verified(&self) -> Vec<(u32, BlockHash)> {
        self.verified.lock().clone()
    }

    /// Every `(height, hash)` reported as connected, in order.
    pub fn connected(&self) -> Vec<(u32, BlockHash)> {
        self.connected.lock().clone()
    }
}

impl BlockValidator for MockValidator {
    fn verify_block(&self, block: &Block, height: u32) -> Result<(), BlockValidationError> {
        let hash = block.hash();
        self.verified.lock().push((height, hash));
        if self.panicking.lock().remove(&hash) {
            panic!("validator blew up on {hash}");
        }
        if self.rejected.lock().contains(&hash) {
            return Err(BlockValidationError {
                hash,
                height,
                reason: "rejected by test".to_string(),
            });
        }
        Ok(())
    }

    fn block_connected(&self, block: &Block, height: u32) {
        self.connected.lock().push((height, block.hash()));
    }
}

/// Grind the nonce until the header meets its own `bits`.
pub fn mine_header(prev: &BlockHeader, time: u32, bits: u32, tag: u32) -> BlockHeader {
    let target = Target::from_compact(bits).expect("valid bits");
    let mut merkle_root = [0u8; 32];
    merkle_root[..4].copy_from_slice(&tag.to_le_bytes());
    let mut header = BlockHeader::new(1, prev.hash(), merkle_root, time, bits, 0);
    while !target.is_met_by(&header.hash()) {
        header.nonce += 1;
        header.rehash();
    }
    header
}

/// `count` headers on top of `tip`, spaced `spacing` seconds apart, same bits.
pub fn mine_headers(tip: &BlockHeader, count: usize, spacing: u32) -> Vec<BlockHeader> {
    let mut out: Vec<BlockHeader> = Vec::with_capacity(count);
    for i in 0..count {
        let prev = out.last().unwrap_or(tip);
        let header = mine_header(prev, prev.time + spacing, tip.bits, i as u32);
        out.push(header);
    }
    out
}

/// Block with `header` and a small body derived from its nonce.
pub fn block_for(header: &BlockHeader) -> Block {
    let mut body = vec![0x01];
    body.extend_from_slice(&header.nonce.to_le_bytes());
    Block::new(header.clone(), Bytes::from(body))
}
