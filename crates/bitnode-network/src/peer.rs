//! Per-peer session state shared between the session task and the chain.

use crate::inventory::Inventory;
use crate::violation::{Penalties, Severity, ViolationKind};
use bitnode_consensus::BlockHash;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Allocate a fresh process-unique id.
    pub fn next() -> Self {
        Self(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Where a delivered block sits in the peer's request list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// First outstanding request; it has been consumed.
    Expected(Inventory),
    /// Requested, but other requests come first.
    OutOfOrder { position: usize },
    /// Never requested from this peer.
    Unrequested,
}

/// State of one connected peer as seen by the sync core.
///
/// The session task owns the socket; the chain reads and refills the
/// request list and records violations here.
pub struct PeerSession {
    id: PeerId,
    supports_witness: bool,
    requests: Mutex<Vec<Inventory>>,
    minor_violations: AtomicU32,
    major_violations: AtomicU32,
    penalty: AtomicU32,
    new_inv: Notify,
}

impl PeerSession {
    /// New session with an empty request list.
    pub fn new(id: PeerId, supports_witness: bool) -> Self {
        Self {
            id,
            supports_witness,
            requests: Mutex::new(Vec::new()),
            minor_violations: AtomicU32::new(0),
            major_violations: AtomicU32::new(0),
            penalty: AtomicU32::new(0),
            new_inv: Notify::new(),
        }
    }

    /// Peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Whether the peer serves witness blocks.
    pub fn supports_witness(&self) -> bool {
        self.supports_witness
    }

    /// Match a delivered block against the outstanding requests.
    pub fn claim_delivery(&self, hash: &BlockHash) -> Delivery {
        let mut requests = self.requests.lock();
        match requests.iter().position(|inv| &inv.hash == hash) {
            Some(0) => Delivery::Expected(requests.remove(0)),
            Some(position) => Delivery::OutOfOrder { position },
            None => Delivery::Unrequested,
        }
    }

    /// Queue more requests for the send loop.
    pub fn add_requests(&self, invs: impl IntoIterator<Item = Inventory>) {
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.extend(invs);
        debug!(peer = %self.id, added = requests.len() - before, "Queued block requests");
    }

    /// Take every outstanding request.
    pub fn drain_requests(&self) -> Vec<Inventory> {
        std::mem::take(&mut *self.requests.lock())
    }

    /// Copy of the outstanding requests, in order.
    pub fn requests(&self) -> Vec<Inventory> {
        self.requests.lock().clone()
    }

    /// Whether anything is still outstanding.
    pub fn has_requests(&self) -> bool {
        !self.requests.lock().is_empty()
    }

    /// Number of outstanding requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Record a protocol violation.
    pub fn record_violation(&self, kind: ViolationKind) {
        let severity = kind.severity();
        match severity {
            Severity::Minor => self.minor_violations.fetch_add(1, Ordering::Relaxed),
            Severity::Major => self.major_violations.fetch_add(1, Ordering::Relaxed),
        };
        let _ = self
            .penalty
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                Some(p.saturating_add(severity.penalty()).min(Penalties::MAX_PENALTY))
            });
        let penalty = self.penalty();
        warn!(peer = %self.id, violation = %kind, ?severity, penalty, "Peer violation");
    }

    /// Minor violations so far.
    pub fn minor_violations(&self) -> u32 {
        self.minor_violations.load(Ordering::Relaxed)
    }

    /// Major violations so far.
    pub fn major_violations(&self) -> u32 {
        self.major_violations.load(Ordering::Relaxed)
    }

    /// Accumulated penalty score.
    pub fn penalty(&self) -> u32 {
        self.penalty.load(Ordering::Relaxed)
    }

    /// Whether the connection layer should drop this peer.
    pub fn should_disconnect(&self) -> bool {
        self.penalty() >= Penalties::DISCONNECT_THRESHOLD
    }

    /// Wake the send loop: new requests are waiting.
    pub fn signal_new_inv(&self) {
        self.new_inv.notify_one();
    }

    /// Wait until [`signal_new_inv`](Self::signal_new_inv) is called.
    pub async fn wait_new_inv(&self) {
        self.new_inv.notified().await;
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("requests", &self.request_count())
            .field("minor_violations", &self.minor_violations())
            .field("major_violations", &self.major_violations())
            .finish()
    }
}
