//! # bitnode-storage
//!
//! Persistence for the sync core.
//!
//! Three pieces of state survive restarts:
//! - The header log: every known header, 80 bytes each, in chain order
//! - The block index: one 40-byte record per applied block, genesis first
//! - Raw blocks, keyed by hash
//!
//! The header log and block index are byte-exact flat formats so that a
//! data directory can be inspected or repaired with ordinary tools.

mod error;
mod file_store;
mod memory;
mod record;

pub use error::{StorageError, StorageResult};
pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use record::{BlockIndexRecord, RECORD_SIZE};

use bitnode_consensus::{Block, BlockHash};

/// Storage trait for the header log, block index and raw blocks.
///
/// This allows for easy testing with in-memory implementations.
pub trait ChainStore: Send + Sync {
    /// Read the whole header log, `None` if it was never written.
    fn read_header_log(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the header log.
    fn write_header_log(&self, data: &[u8]) -> StorageResult<()>;

    /// Append serialized headers to the header log.
    fn append_header_log(&self, data: &[u8]) -> StorageResult<()>;

    /// Read the whole block index, `None` if it was never written.
    fn read_block_index(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Truncate the block index to zero records.
    fn clear_block_index(&self) -> StorageResult<()>;

    /// Store a block and append its index record.
    fn write_block(&self, block: &Block, height: u32) -> StorageResult<()>;

    /// Read a stored block's raw bytes.
    fn read_block(&self, hash: &BlockHash) -> StorageResult<Option<Vec<u8>>>;

    /// Parsed block index records.
    fn block_index_records(&self) -> StorageResult<Vec<BlockIndexRecord>> {
        match self.read_block_index()? {
            Some(data) => BlockIndexRecord::parse_all(&data),
            None => Ok(Vec::new()),
        }
    }
}

/// Index record describing `block` at `height`.
pub(crate) fn index_record(block: &Block, height: u32) -> BlockIndexRecord {
    BlockIndexRecord {
        hash: block.hash(),
        height,
        size: block.serialized_size() as u32,
    }
}
