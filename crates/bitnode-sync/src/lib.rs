//! # bitnode-sync
//!
//! Chain synchronization for a Bitcoin-style node.
//!
//! This crate provides:
//! - The header chain with retargeting, locators and getheaders answers
//! - Headers-first then blocks-first sync state
//! - Download bookkeeping: backlog, failed batches, per-peer reconciliation
//!   and unsolicited blocks
//! - [`Chain`], which serializes every tip advance behind one lock
//!
//! ## Flow
//!
//! Peer sessions feed header batches into [`Chain::process_headers`]. Once a
//! batch brings nothing new and the tail is fresh, the chain switches to
//! [`SyncState::BlocksSync`] and seeds the backlog. Sessions then receive
//! block requests, deliver blocks through [`Chain::process_block`], and the
//! chain applies each block whose parent is the tip via the
//! [`BlockValidator`].

mod chain;
mod clock;
mod config;
mod error;
mod header_chain;
mod reconciler;
mod solo;
mod state;
mod tracker;
mod validator;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use chain::{BlockOutcome, Chain, ChainStatus, HeadersOutcome};
pub use clock::{Clock, SystemClock};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use header_chain::{HeaderChain, HeaderRejection};
pub use reconciler::PeerBlockReconciler;
pub use solo::SoloBlockQueue;
pub use state::{BlockConnected, SyncEvent, SyncState, SyncStateMachine, Transition};
pub use tracker::PendingBlockTracker;
pub use validator::{BlockValidationError, BlockValidator};
