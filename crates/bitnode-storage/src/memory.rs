//! In-memory store for tests and ephemeral nodes.

use crate::{index_record, ChainStore, StorageError, StorageResult};
use bitnode_consensus::{Block, BlockHash};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Inner {
    header_log: Option<Vec<u8>>,
    block_index: Option<Vec<u8>>,
    blocks: HashMap<BlockHash, Vec<u8>>,
}

/// [`ChainStore`] kept entirely in memory.
///
/// Writes can be made to fail on demand to exercise rollback paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Empty store, as on first start.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose header log starts with `data`.
    pub fn with_header_log(data: Vec<u8>) -> Self {
        let store = Self::new();
        store.inner.write().header_log = Some(data);
        store
    }

    /// Preload the block index with raw bytes.
    pub fn set_block_index(&self, data: Vec<u8>) {
        self.inner.write().block_index = Some(data);
    }

    /// Make every subsequent write fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current header log bytes.
    pub fn header_log(&self) -> Option<Vec<u8>> {
        self.inner.read().header_log.clone()
    }

    /// Current block index bytes.
    pub fn block_index(&self) -> Option<Vec<u8>> {
        self.inner.read().block_index.clone()
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "writes disabled",
            )));
        }
        Ok(())
    }
}

impl ChainStore for MemoryStore {
    fn read_header_log(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.header_log())
    }

    fn write_header_log(&self, data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        self.inner.write().header_log = Some(data.to_vec());
        Ok(())
    }

    fn append_header_log(&self, data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        self.inner
            .write()
            .header_log
            .get_or_insert_with(Vec::new)
            .extend_from_slice(data);
        Ok(())
    }

    fn read_block_index(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.block_index())
    }

    fn clear_block_index(&self) -> StorageResult<()> {
        self.check_writable()?;
        self.inner.write().block_index = Some(Vec::new());
        Ok(())
    }

    fn write_block(&self, block: &Block, height: u32) -> StorageResult<()> {
        self.check_writable()?;
        let record = index_record(block, height);
        let mut inner = self.inner.write();
        inner.blocks.insert(record.hash, block.to_bytes());
        inner
            .block_index
            .get_or_insert_with(Vec::new)
            .extend_from_slice(&record.to_bytes());
        Ok(())
    }

    fn read_block(&self, hash: &BlockHash) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.read().blocks.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RECORD_SIZE;
    use bitnode_consensus::BlockHeader;
    use bytes::Bytes;

    #[test]
    fn test_failing_writes_leave_state_untouched() {
        let store = MemoryStore::with_header_log(vec![0u8; 80]);
        store.set_fail_writes(true);
        assert!(store.append_header_log(&[1u8; 80]).is_err());
        assert_eq!(store.header_log().unwrap().len(), 80);

        store.set_fail_writes(false);
        store.append_header_log(&[1u8; 80]).unwrap();
        assert_eq!(store.header_log().unwrap().len(), 160);
    }

    #[test]
    fn test_write_block_records_index() {
        let store = MemoryStore::new();
        let header = BlockHeader::new(1, BlockHash::ZERO, [0u8; 32], 0, 0x207fffff, 0);
        let block = Block::new(header, Bytes::new());
        store.write_block(&block, 0).unwrap();
        assert_eq!(store.block_count(), 1);
        assert_eq!(store.block_index().unwrap().len(), RECORD_SIZE);
        assert_eq!(store.block_index_records().unwrap()[0].size, 80);
    }
}
