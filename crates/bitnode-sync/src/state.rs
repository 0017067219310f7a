//! Sync state machine and chain events.

use bitnode_consensus::BlockHash;
use std::fmt;
use tracing::info;

/// Synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Startup, nothing decided yet.
    #[default]
    None,
    /// Requesting headers.
    HeadersSync,
    /// Headers are current; downloading and applying blocks.
    BlocksSync,
    /// Caught up.
    Synchronized,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::HeadersSync => write!(f, "headers-sync"),
            Self::BlocksSync => write!(f, "blocks-sync"),
            Self::Synchronized => write!(f, "synchronized"),
        }
    }
}

/// Sync lifecycle notifications. Each fires once per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Header download finished; block download starts.
    HeaderSyncEnd,
    /// Block download finished.
    BlockSyncEnd,
}

/// A block became the new tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockConnected {
    pub height: u32,
    pub hash: BlockHash,
}

/// Outcome of [`SyncStateMachine::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested state.
    Unchanged,
    /// State changed, firing the event if entering it has one.
    Changed(Option<SyncEvent>),
}

/// Holds the current [`SyncState`] and decides which event a change fires.
#[derive(Debug, Default)]
pub struct SyncStateMachine {
    state: SyncState,
}

impl SyncStateMachine {
    /// Machine in [`SyncState::None`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Move to `next`.
    pub fn transition(&mut self, next: SyncState) -> Transition {
        if self.state == next {
            return Transition::Unchanged;
        }
        info!(from = %self.state, to = %next, "Sync state changed");
        self.state = next;
        Transition::Changed(match next {
            SyncState::BlocksSync => Some(SyncEvent::HeaderSyncEnd),
            SyncState::Synchronized => Some(SyncEvent::BlockSyncEnd),
            SyncState::None | SyncState::HeadersSync => None,
        })
    }
}
