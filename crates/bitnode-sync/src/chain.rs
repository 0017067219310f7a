//! The chain core.
//!
//! Header chain, validated height, sync state and every download queue sit
//! behind one mutex. Peer sessions call in concurrently; only one caller at
//! a time drives block application, and the expensive validator call runs
//! outside the lock with its result re-checked against the tip on commit.
//!
//! Lock order is chain state first, then a peer's request list.

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::header_chain::{HeaderChain, HeaderRejection};
use crate::reconciler::PeerBlockReconciler;
use crate::solo::SoloBlockQueue;
use crate::state::{BlockConnected, SyncEvent, SyncState, SyncStateMachine, Transition};
use crate::tracker::PendingBlockTracker;
use crate::validator::{BlockValidationError, BlockValidator};
use crate::SyncResult;
use bitnode_consensus::{Block, BlockHash, BlockHeader, ChainParams, Target};
use bitnode_network::{Delivery, Inventory, PeerSession, ViolationKind};
use bitnode_storage::{ChainStore, RECORD_SIZE};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, trace, warn};

/// Capacity of the block-connected channel. Slow subscribers lag.
const BLOCK_CHANNEL_CAPACITY: usize = 1024;

/// Tip advances are logged at info level every this many blocks.
const TIP_LOG_INTERVAL: u32 = 1000;

/// Result of [`Chain::process_headers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadersOutcome {
    /// New headers were appended.
    Accepted { count: usize },
    /// Everything in the batch was already known.
    NoNewHeaders,
    /// The batch does not attach to any known header.
    UnknownPrevious,
    /// The batch diverges from the stored chain; nothing was stored.
    Fork,
    /// A header failed validation; the `accepted` headers before it were kept.
    Invalid {
        accepted: usize,
        reason: HeaderRejection,
    },
}

/// Result of [`Chain::process_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Held for application.
    Queued,
    /// Dropped without penalty.
    Ignored,
    /// Dropped and a violation recorded on the peer.
    Rejected,
}

/// Point-in-time view of the chain for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    /// Sync state.
    pub state: SyncState,
    /// Block-validated height.
    pub height: u32,
    /// Hash of the header at `height`.
    pub tip: BlockHash,
    /// Known headers, genesis included.
    pub header_count: usize,
    /// Hashes waiting in the backlog.
    pub backlog: usize,
    /// Failed batches waiting to be re-issued.
    pub failed_batches: usize,
    /// Blocks buffered per peer, summed.
    pub queued_peer_blocks: usize,
    /// Unsolicited blocks waiting for their parent.
    pub solo_blocks: usize,
}

enum ApplySource {
    Peer(Arc<PeerSession>),
    Solo,
}

struct ChainState {
    headers: HeaderChain,
    height: u32,
    machine: SyncStateMachine,
    tracker: PendingBlockTracker,
    reconciler: PeerBlockReconciler,
    solo: SoloBlockQueue,
    applying: bool,
    sync_observers: Vec<mpsc::UnboundedSender<SyncEvent>>,
}

impl ChainState {
    fn tip(&self) -> BlockHash {
        self.headers
            .hash_at(self.height as usize)
            .unwrap_or_else(|| self.headers.last().hash())
    }

    fn is_applied(&self, hash: &BlockHash) -> bool {
        self.headers
            .position(hash)
            .map_or(false, |p| p <= self.height as usize)
    }

    fn accepts_blocks(&self) -> bool {
        matches!(
            self.machine.state(),
            SyncState::BlocksSync | SyncState::Synchronized
        )
    }

    fn seed_backlog(&mut self) {
        let start = self.height as usize + 1;
        let hashes: Vec<BlockHash> = self.headers.headers()[start.min(self.headers.len())..]
            .iter()
            .map(BlockHeader::hash)
            .collect();
        self.tracker.seed(hashes);
    }

    /// Next block that extends the tip, from any queue.
    fn next_candidate(&mut self) -> Option<(Block, ApplySource)> {
        let height = self.height as usize;
        let expected = self.headers.hash_at(height + 1)?;
        let headers = &self.headers;
        let is_applied = |h: &BlockHash| headers.position(h).map_or(false, |p| p <= height);

        if let Some((peer, _, block)) = self.reconciler.take_connecting(&expected, is_applied) {
            return Some((block, ApplySource::Peer(peer)));
        }
        self.solo
            .take_connecting(&expected, is_applied)
            .map(|block| (block, ApplySource::Solo))
    }

    /// Hand `peer` its next batch of block requests.
    ///
    /// Batches applied in full while queued are skipped; returns 0 only
    /// once the tracker has nothing left.
    fn refill(&mut self, peer: &PeerSession, config: &SyncConfig) -> usize {
        let hashes = loop {
            let headers = &self.headers;
            let mut hashes = self
                .tracker
                .next_batch(config.block_batch_size, |h| headers.position(h));
            if hashes.is_empty() {
                return 0;
            }
            hashes.retain(|h| !self.is_applied(h));
            if !hashes.is_empty() {
                break hashes;
            }
        };

        let witness = config.request_witness_blocks && peer.supports_witness();
        let count = hashes.len();
        peer.add_requests(hashes.into_iter().map(|hash| {
            if witness {
                Inventory::witness_block(hash)
            } else {
                Inventory::block(hash)
            }
        }));
        peer.signal_new_inv();
        count
    }
}

struct ChainInner {
    config: SyncConfig,
    store: Arc<dyn ChainStore>,
    validator: Arc<dyn BlockValidator>,
    clock: Arc<dyn Clock>,
    state: Mutex<ChainState>,
    blocks: broadcast::Sender<BlockConnected>,
}

/// Shared handle to the chain core. Cheap to clone.
#[derive(Clone)]
pub struct Chain {
    inner: Arc<ChainInner>,
}

impl Chain {
    /// Load persisted state, repairing it if needed.
    pub fn new(
        params: ChainParams,
        config: SyncConfig,
        store: Arc<dyn ChainStore>,
        validator: Arc<dyn BlockValidator>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let network = params.network;
        let headers = HeaderChain::load(params, store.as_ref())?;
        let height = recover_block_index(&headers, store.as_ref())?;
        info!(%network, headers = headers.len(), height, "Chain loaded");

        let (blocks, _) = broadcast::channel(BLOCK_CHANNEL_CAPACITY);
        let state = ChainState {
            headers,
            height,
            machine: SyncStateMachine::new(),
            tracker: PendingBlockTracker::new(),
            reconciler: PeerBlockReconciler::new(),
            solo: SoloBlockQueue::new(),
            applying: false,
            sync_observers: Vec::new(),
        };

        Ok(Self {
            inner: Arc::new(ChainInner {
                config,
                store,
                validator,
                clock,
                state: Mutex::new(state),
                blocks,
            }),
        })
    }

    /// Sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Register for sync lifecycle events from now on.
    ///
    /// Every registered observer receives every event; none are dropped
    /// however far behind the receiver is.
    pub fn subscribe_sync(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state.lock().sync_observers.push(tx);
        rx
    }

    /// Receive tip advances from now on.
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<BlockConnected> {
        self.inner.blocks.subscribe()
    }

    /// Current sync state.
    pub fn state(&self) -> SyncState {
        self.inner.state.lock().machine.state()
    }

    /// Change the sync state. Setting the current state does nothing.
    pub fn set_state(&self, next: SyncState) {
        let mut st = self.inner.state.lock();
        self.transition(&mut st, next);
    }

    fn transition(&self, st: &mut ChainState, next: SyncState) {
        let Transition::Changed(event) = st.machine.transition(next) else {
            return;
        };
        if next == SyncState::BlocksSync {
            st.seed_backlog();
        }
        if let Some(event) = event {
            // Dropped receivers unregister
            st.sync_observers.retain(|tx| tx.send(event).is_ok());
        }
    }

    /// Block-validated height.
    pub fn height(&self) -> u32 {
        self.inner.state.lock().height
    }

    /// Hash of the highest applied block.
    pub fn tip(&self) -> BlockHash {
        self.inner.state.lock().tip()
    }

    /// Number of known headers, genesis included.
    pub fn header_count(&self) -> usize {
        self.inner.state.lock().headers.len()
    }

    /// Header at `index`.
    pub fn header_at(&self, index: usize) -> Option<BlockHeader> {
        self.inner.state.lock().headers.get(index).cloned()
    }

    /// Target the next header must meet.
    pub fn next_target(&self) -> SyncResult<Target> {
        let st = self.inner.state.lock();
        Ok(st.headers.next_target(st.headers.len())?)
    }

    /// Block locator for a getheaders request.
    pub fn locator(&self) -> Vec<BlockHash> {
        let now = self.inner.clock.now();
        self.inner
            .state
            .lock()
            .headers
            .locator(now, self.inner.config.header_freshness_secs)
    }

    /// Headers to answer a peer's getheaders request with.
    pub fn missing_headers(&self, known: &[BlockHash], stop: &BlockHash) -> Vec<BlockHeader> {
        self.inner.state.lock().headers.missing_headers(
            known,
            stop,
            self.inner.config.max_headers_per_response,
        )
    }

    /// Diagnostics snapshot.
    pub fn status(&self) -> ChainStatus {
        let st = self.inner.state.lock();
        ChainStatus {
            state: st.machine.state(),
            height: st.height,
            tip: st.tip(),
            header_count: st.headers.len(),
            backlog: st.tracker.backlog_len(),
            failed_batches: st.tracker.failed_batch_count(),
            queued_peer_blocks: st.reconciler.queued_blocks(),
            solo_blocks: st.solo.len(),
        }
    }

    /// Ingest a headers message from `peer`.
    #[instrument(skip_all, fields(peer = %peer.id(), count = headers.len()))]
    pub fn process_headers(
        &self,
        headers: &[BlockHeader],
        peer: &PeerSession,
    ) -> SyncResult<HeadersOutcome> {
        let mut st = self.inner.state.lock();

        let Some(first) = headers.first() else {
            return Ok(self.no_new_headers(&mut st));
        };

        let Some(mut pos) = st.headers.find_height(&first.prev_block_hash) else {
            debug!(prev = %first.prev_block_hash, "Headers do not attach to our chain");
            peer.record_violation(ViolationKind::UnknownLocator);
            return Ok(HeadersOutcome::UnknownPrevious);
        };

        // Skip what we already have; a mismatch means a competing chain
        let mut skip = 0;
        while pos < st.headers.len() && skip < headers.len() {
            if st.headers.hash_at(pos) != Some(headers[skip].hash()) {
                info!(height = pos, "Peer is on a fork, ignoring its headers");
                return Ok(HeadersOutcome::Fork);
            }
            pos += 1;
            skip += 1;
        }
        if skip == headers.len() {
            return Ok(self.no_new_headers(&mut st));
        }

        let now = self.inner.clock.now();
        let start = st.headers.len();
        let (accepted, rejection) =
            st.headers
                .extend_checked(&headers[skip..], now, self.inner.validator.as_ref());
        st.headers.persist_from(start, self.inner.store.as_ref())?;

        let new_hashes: Vec<BlockHash> = st.headers.headers()[start..]
            .iter()
            .map(BlockHeader::hash)
            .collect();
        for hash in new_hashes {
            st.tracker.push_new(hash);
        }

        if let Some(reason) = rejection {
            warn!(accepted, %reason, "Invalid header in batch");
            peer.record_violation(ViolationKind::InvalidHeader);
            return Ok(HeadersOutcome::Invalid { accepted, reason });
        }

        info!(
            accepted,
            headers = st.headers.len(),
            tip_time = st.headers.last().time,
            "Accepted headers"
        );
        Ok(HeadersOutcome::Accepted { count: accepted })
    }

    fn no_new_headers(&self, st: &mut ChainState) -> HeadersOutcome {
        if st.machine.state() == SyncState::HeadersSync {
            let age = self
                .inner
                .clock
                .now()
                .saturating_sub(st.headers.last().time as u64);
            if age <= self.inner.config.header_freshness_secs {
                self.transition(st, SyncState::BlocksSync);
            }
        }
        HeadersOutcome::NoNewHeaders
    }

    /// Ingest one block delivered by `peer`.
    ///
    /// Application happens on a blocking task when called inside a Tokio
    /// runtime, inline otherwise.
    pub fn process_block(
        &self,
        block: Block,
        peer: &Arc<PeerSession>,
    ) -> SyncResult<BlockOutcome> {
        let outcome = {
            let mut st = self.inner.state.lock();
            self.ingest(&mut st, block, peer)?
        };
        if outcome == BlockOutcome::Queued {
            self.schedule_apply();
        }
        Ok(outcome)
    }

    /// Ingest a whole downloaded batch in order, stopping at the first
    /// rejected block.
    #[instrument(skip_all, fields(peer = %peer.id(), count = blocks.len()))]
    pub fn process_received_blocks(
        &self,
        blocks: Vec<Block>,
        peer: &Arc<PeerSession>,
    ) -> SyncResult<BlockOutcome> {
        let mut outcome = BlockOutcome::Ignored;
        let mut queued = false;
        {
            let mut st = self.inner.state.lock();
            for block in blocks {
                match self.ingest(&mut st, block, peer)? {
                    BlockOutcome::Queued => {
                        queued = true;
                        outcome = BlockOutcome::Queued;
                    }
                    BlockOutcome::Ignored => {}
                    BlockOutcome::Rejected => {
                        outcome = BlockOutcome::Rejected;
                        break;
                    }
                }
            }
        }
        if queued {
            self.schedule_apply();
        }
        Ok(outcome)
    }

    fn ingest(
        &self,
        st: &mut ChainState,
        block: Block,
        peer: &Arc<PeerSession>,
    ) -> SyncResult<BlockOutcome> {
        let outcome = if st.accepts_blocks() {
            self.route_block(st, block, peer)?
        } else {
            trace!(state = %st.machine.state(), "Not syncing blocks, ignoring block");
            BlockOutcome::Ignored
        };

        if outcome != BlockOutcome::Rejected && !peer.has_requests() {
            st.refill(peer, &self.inner.config);
        }
        Ok(outcome)
    }

    fn route_block(
        &self,
        st: &mut ChainState,
        block: Block,
        peer: &Arc<PeerSession>,
    ) -> SyncResult<BlockOutcome> {
        let hash = block.hash();
        match peer.claim_delivery(&hash) {
            Delivery::Expected(inv) => {
                trace!(peer = %peer.id(), %hash, "Buffered requested block");
                st.reconciler.push(peer, inv, block);
                Ok(BlockOutcome::Queued)
            }
            Delivery::OutOfOrder { position } => {
                debug!(peer = %peer.id(), %hash, position, "Block delivered out of order");
                peer.record_violation(ViolationKind::OutOfOrderBlock);
                Ok(BlockOutcome::Rejected)
            }
            Delivery::Unrequested => self.accept_unsolicited(st, block, peer),
        }
    }

    fn accept_unsolicited(
        &self,
        st: &mut ChainState,
        block: Block,
        peer: &PeerSession,
    ) -> SyncResult<BlockOutcome> {
        let hash = block.hash();
        let Some(slot) = st.headers.find_height(&block.prev_hash()) else {
            debug!(%hash, "Unsolicited block with unknown parent, ignoring");
            return Ok(BlockOutcome::Ignored);
        };

        if slot < st.headers.len() {
            peer.record_violation(ViolationKind::UnsolicitedBlock);
            return Ok(BlockOutcome::Rejected);
        }

        if slot - st.height as usize > self.inner.config.solo_block_lookahead as usize {
            debug!(%hash, slot, height = st.height, "Unsolicited block too far ahead, ignoring");
            return Ok(BlockOutcome::Ignored);
        }

        let now = self.inner.clock.now();
        if let Err(reason) =
            st.headers
                .check_header(&block.header, now, self.inner.validator.as_ref())
        {
            debug!(%hash, %reason, "Unsolicited block has an invalid header");
            peer.record_violation(ViolationKind::InvalidHeader);
            return Ok(BlockOutcome::Rejected);
        }

        st.headers
            .append_validated(vec![block.header.clone()], self.inner.store.as_ref())?;
        st.solo.push(block);
        debug!(%hash, height = slot, "Queued unsolicited block");
        Ok(BlockOutcome::Queued)
    }

    /// Ask `peer` for the next batch of blocks. Returns how many were added.
    pub fn request_blocks(&self, peer: &PeerSession) -> usize {
        let mut st = self.inner.state.lock();
        st.refill(peer, &self.inner.config)
    }

    /// Return unapplied hashes of an abandoned batch for priority re-issue.
    pub fn put_back(&self, hashes: Vec<BlockHash>) {
        self.inner.state.lock().tracker.put_back(hashes);
    }

    /// Requeue everything `peer` was holding or still owed us.
    pub fn peer_disconnected(&self, peer: &PeerSession) {
        let mut st = self.inner.state.lock();
        let mut hashes: Vec<BlockHash> = st
            .reconciler
            .remove_peer(&peer.id())
            .into_iter()
            .map(|inv| inv.hash)
            .collect();
        hashes.extend(peer.drain_requests().into_iter().map(|inv| inv.hash));
        hashes.retain(|h| !st.is_applied(h));
        info!(peer = %peer.id(), put_back = hashes.len(), "Peer disconnected");
        st.tracker.put_back(hashes);
    }

    fn schedule_apply(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let chain = self.clone();
                handle.spawn_blocking(move || chain.apply_pending());
            }
            Err(_) => self.apply_pending(),
        }
    }

    /// Apply every queued block that extends the tip, until none does.
    ///
    /// Returns immediately if another caller is already applying; that
    /// caller keeps going until the queues are exhausted.
    pub fn apply_pending(&self) {
        loop {
            let (block, source, height) = {
                let mut st = self.inner.state.lock();
                if st.applying {
                    return;
                }
                let Some((block, source)) = st.next_candidate() else {
                    return;
                };
                st.applying = true;
                (block, source, st.height + 1)
            };

            let verdict = panic::catch_unwind(AssertUnwindSafe(|| {
                self.inner.validator.verify_block(&block, height)
            }));

            let mut st = self.inner.state.lock();
            st.applying = false;
            match verdict {
                Ok(verdict) => self.commit(&mut st, block, source, height, verdict),
                Err(_) => {
                    let hash = block.hash();
                    error!(%hash, height, "Block validator panicked, fetching again");
                    requeue(&mut st, hash, source);
                }
            }
        }
    }

    fn commit(
        &self,
        st: &mut ChainState,
        block: Block,
        source: ApplySource,
        height: u32,
        verdict: Result<(), BlockValidationError>,
    ) {
        let hash = block.hash();
        if st.height + 1 != height || st.headers.hash_at(height as usize) != Some(hash) {
            debug!(%hash, height, "Tip moved during validation, dropping block");
            return;
        }

        if let Err(e) = verdict {
            warn!(%hash, height, error = %e, "Block failed validation");
            if let ApplySource::Peer(peer) = &source {
                peer.record_violation(ViolationKind::InvalidBlock);
            }
            requeue(st, hash, source);
            return;
        }

        if let Err(e) = self.inner.store.write_block(&block, height) {
            warn!(%hash, height, error = %e, "Failed to store block, fetching again");
            requeue(st, hash, source);
            return;
        }

        st.height = height;
        self.inner.validator.block_connected(&block, height);
        if height % TIP_LOG_INTERVAL == 0 {
            info!(height, %hash, "Chain tip advanced");
        } else {
            debug!(height, %hash, "Block connected");
        }
        // No subscribers is fine
        let _ = self.inner.blocks.send(BlockConnected { height, hash });
    }
}

/// Schedule a block that could not be applied for download again.
///
/// A peer's buffered and outstanding blocks all descend from it, so they go
/// back as one failed batch led by the block itself.
fn requeue(st: &mut ChainState, hash: BlockHash, source: ApplySource) {
    match source {
        ApplySource::Peer(peer) => {
            let mut batch = vec![hash];
            batch.extend(
                st.reconciler
                    .remove_peer(&peer.id())
                    .into_iter()
                    .chain(peer.drain_requests())
                    .map(|inv| inv.hash),
            );
            st.tracker.put_back(batch);
        }
        ApplySource::Solo => st.tracker.push_retry(hash),
    }
}

/// Validated height from the block index, resetting the index to the
/// genesis block when it is missing, corrupted or ahead of the headers.
fn recover_block_index(headers: &HeaderChain, store: &dyn ChainStore) -> SyncResult<u32> {
    let data = store.read_block_index()?.unwrap_or_default();
    if data.is_empty() {
        info!("No block index, storing genesis block");
    } else if data.len() % RECORD_SIZE != 0 {
        warn!(bytes = data.len(), "Block index corrupted, resetting to genesis");
    } else {
        let height = data.len() / RECORD_SIZE - 1;
        if height < headers.len() {
            return Ok(height as u32);
        }
        warn!(
            height,
            headers = headers.len(),
            "Block index ahead of header chain, resetting to genesis"
        );
    }

    store.clear_block_index()?;
    store.write_block(&headers.params().genesis_block(), 0)?;
    Ok(0)
}
