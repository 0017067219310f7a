//! Block hashes that still need downloading.

use bitnode_consensus::BlockHash;
use std::collections::VecDeque;
use tracing::debug;

/// Tracks which headers above the validated height still need their block.
///
/// `backlog` is served front first: it is seeded lowest height first, newly
/// accepted headers go to the back and hashes that must be fetched again go
/// to the front. `failed_batches` holds the unapplied remainder of batches a
/// peer could not finish and is always served before the backlog.
#[derive(Debug, Default)]
pub struct PendingBlockTracker {
    backlog: VecDeque<BlockHash>,
    failed_batches: Vec<Vec<BlockHash>>,
    seeded: bool,
}

impl PendingBlockTracker {
    /// Empty, unseeded tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the backlog has been seeded.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Seed the backlog once with hashes in ascending height order.
    pub fn seed(&mut self, hashes: impl IntoIterator<Item = BlockHash>) {
        if self.seeded {
            return;
        }
        self.backlog.extend(hashes);
        self.seeded = true;
        debug!(backlog = self.backlog.len(), "Seeded block backlog");
    }

    /// Newly accepted header; ignored until seeded (seeding will cover it).
    pub fn push_new(&mut self, hash: BlockHash) {
        if self.seeded {
            self.backlog.push_back(hash);
        }
    }

    /// A block that must be fetched again, ahead of everything in the backlog.
    pub fn push_retry(&mut self, hash: BlockHash) {
        self.backlog.push_front(hash);
    }

    /// Record the unapplied remainder of a failed or abandoned batch.
    pub fn put_back(&mut self, hashes: Vec<BlockHash>) {
        if !hashes.is_empty() {
            debug!(count = hashes.len(), "Put back failed batch");
            self.failed_batches.push(hashes);
        }
    }

    /// Next batch to hand a peer.
    ///
    /// The failed batch rooted lowest in the chain is served whole; otherwise
    /// up to `max` hashes come off the backlog.
    pub fn next_batch(
        &mut self,
        max: usize,
        height_of: impl Fn(&BlockHash) -> Option<usize>,
    ) -> Vec<BlockHash> {
        let deepest = self
            .failed_batches
            .iter()
            .enumerate()
            .min_by_key(|(_, batch)| {
                batch
                    .first()
                    .and_then(|hash| height_of(hash))
                    .unwrap_or(usize::MAX)
            })
            .map(|(i, _)| i);

        if let Some(i) = deepest {
            return self.failed_batches.remove(i);
        }

        let take = max.min(self.backlog.len());
        self.backlog.drain(..take).collect()
    }

    /// Hashes waiting in the backlog.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Failed batches waiting to be re-issued.
    pub fn failed_batch_count(&self) -> usize {
        self.failed_batches.len()
    }

    /// Nothing left to request.
    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty() && self.failed_batches.is_empty()
    }
}
