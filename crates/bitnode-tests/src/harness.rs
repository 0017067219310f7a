//! Test harness for integration tests.
//!
//! [`TestNode`] wires a [`Chain`] to a [`FileStore`] in a temporary
//! directory, with a manual clock and a recording validator.

use crate::generators::regtest_headers;
use bitnode_consensus::{Block, BlockHeader, ChainParams};
use bitnode_network::PeerSession;
use bitnode_storage::FileStore;
use bitnode_sync::test_utils::{block_for, ManualClock, MockValidator};
use bitnode_sync::{Chain, HeadersOutcome, SyncConfig, SyncState};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A chain over a throwaway data directory, plus the headers it will sync.
pub struct TestNode {
    /// Chain under test.
    pub chain: Chain,
    /// Store backing the chain.
    pub store: Arc<FileStore>,
    /// Validator the chain calls.
    pub validator: Arc<MockValidator>,
    /// Clock the chain reads.
    pub clock: Arc<ManualClock>,
    /// Headers above genesis, not yet given to the chain.
    pub headers: Vec<BlockHeader>,
    config: SyncConfig,
    dir: TempDir,
}

impl TestNode {
    /// Node on an empty directory, with `count` headers ready to sync.
    pub fn new(count: usize) -> Self {
        Self::with_config(count, SyncConfig::default())
    }

    /// Same as [`new`](Self::new) with custom sync settings.
    pub fn with_config(count: usize, config: SyncConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        Self::open(dir, regtest_headers(count), config)
    }

    fn open(dir: TempDir, headers: Vec<BlockHeader>, config: SyncConfig) -> Self {
        let params = ChainParams::regtest();
        let now = headers.last().unwrap_or(&params.genesis).time as u64 + 60;
        let store = Arc::new(FileStore::open(dir.path()).expect("Failed to open store"));
        let validator = Arc::new(MockValidator::new());
        let clock = Arc::new(ManualClock::new(now));
        let chain = Chain::new(
            params,
            config.clone(),
            store.clone(),
            validator.clone(),
            clock.clone(),
        )
        .expect("Failed to load chain");
        Self {
            chain,
            store,
            validator,
            clock,
            headers,
            config,
            dir,
        }
    }

    /// Simulate a restart: drop the chain and load it again from disk.
    pub fn restart(self) -> Self {
        let Self {
            chain,
            store,
            headers,
            config,
            dir,
            ..
        } = self;
        drop(chain);
        drop(store);
        Self::open(dir, headers, config)
    }

    /// Data directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Block for the header at `height` (1-based into [`headers`](Self::headers)).
    pub fn block(&self, height: usize) -> Block {
        block_for(&self.headers[height - 1])
    }

    /// Feed every header through `peer`, then an empty follow-up so the chain
    /// moves on to block sync.
    pub fn sync_headers(&self, peer: &PeerSession) {
        self.chain.set_state(SyncState::HeadersSync);
        let outcome = self
            .chain
            .process_headers(&self.headers, peer)
            .expect("Header processing failed");
        assert_eq!(
            outcome,
            HeadersOutcome::Accepted {
                count: self.headers.len()
            }
        );
        let outcome = self
            .chain
            .process_headers(&[], peer)
            .expect("Header processing failed");
        assert_eq!(outcome, HeadersOutcome::NoNewHeaders);
        assert_eq!(self.chain.state(), SyncState::BlocksSync);
    }
}
