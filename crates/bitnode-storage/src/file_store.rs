//! Flat-file store rooted at a data directory.

use crate::{index_record, ChainStore, StorageResult};
use bitnode_consensus::{Block, BlockHash};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HEADERS_FILE: &str = "headers.dat";
const BLOCK_INDEX_FILE: &str = "blockinfo.dat";
const BLOCKS_DIR: &str = "blocks";

/// File-backed [`ChainStore`].
///
/// Layout under the data directory:
/// - `headers.dat`: concatenated 80-byte headers
/// - `blockinfo.dat`: concatenated 40-byte index records
/// - `blocks/<hash>.blk`: one raw block per file
pub struct FileStore {
    root: PathBuf,
    // Serializes writers; readers see whole files.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open or create a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let root = path.as_ref().to_path_buf();
        info!("Opening chain store at {:?}", root);
        fs::create_dir_all(root.join(BLOCKS_DIR))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Data directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, hash: &BlockHash) -> PathBuf {
        self.root
            .join(BLOCKS_DIR)
            .join(format!("{}.blk", hex::encode(hash.as_bytes())))
    }

    fn read_optional(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        read_if_exists(&self.root.join(name))
    }

    fn append(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(name))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }
}

fn read_if_exists(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl ChainStore for FileStore {
    fn read_header_log(&self) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(HEADERS_FILE)
    }

    fn write_header_log(&self, data: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        // Write aside and rename so a crash never leaves a torn log
        let tmp = self.root.join(format!("{HEADERS_FILE}.tmp"));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, self.root.join(HEADERS_FILE))?;
        debug!(bytes = data.len(), "Rewrote header log");
        Ok(())
    }

    fn append_header_log(&self, data: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        self.append(HEADERS_FILE, data)
    }

    fn read_block_index(&self) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(BLOCK_INDEX_FILE)
    }

    fn clear_block_index(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        fs::write(self.root.join(BLOCK_INDEX_FILE), b"")?;
        Ok(())
    }

    fn write_block(&self, block: &Block, height: u32) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        let record = index_record(block, height);
        // Block file first: the index never points at a missing block
        fs::write(self.block_path(&record.hash), block.to_bytes())?;
        self.append(BLOCK_INDEX_FILE, &record.to_bytes())?;
        debug!(height, hash = %record.hash, size = record.size, "Stored block");
        Ok(())
    }

    fn read_block(&self, hash: &BlockHash) -> StorageResult<Option<Vec<u8>>> {
        read_if_exists(&self.block_path(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockIndexRecord, RECORD_SIZE};
    use bitnode_consensus::{BlockHeader, HEADER_SIZE};
    use bytes::Bytes;
    use tempfile::TempDir;

    fn test_block(nonce: u32) -> Block {
        let header = BlockHeader::new(1, BlockHash::ZERO, [1u8; 32], 1_600_000_000, 0x207fffff, nonce);
        Block::new(header, Bytes::from_static(&[0x01, 0xaa, 0xbb]))
    }

    #[test]
    fn test_missing_files_read_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(store.read_header_log().unwrap(), None);
        assert_eq!(store.read_block_index().unwrap(), None);
        assert_eq!(store.read_block(&BlockHash::ZERO).unwrap(), None);
        assert!(store.block_index_records().unwrap().is_empty());
    }

    #[test]
    fn test_header_log_write_and_append() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();

        store.write_header_log(&[1u8; HEADER_SIZE]).unwrap();
        store.append_header_log(&[2u8; HEADER_SIZE * 2]).unwrap();
        let log = store.read_header_log().unwrap().unwrap();
        assert_eq!(log.len(), HEADER_SIZE * 3);
        assert_eq!(log[HEADER_SIZE], 2);

        // Rewrite replaces rather than appends
        store.write_header_log(&[3u8; HEADER_SIZE]).unwrap();
        assert_eq!(store.read_header_log().unwrap().unwrap(), vec![3u8; HEADER_SIZE]);
    }

    #[test]
    fn test_write_block_appends_index() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();

        let a = test_block(1);
        let b = test_block(2);
        store.write_block(&a, 0).unwrap();
        store.write_block(&b, 1).unwrap();

        let raw = store.read_block_index().unwrap().unwrap();
        assert_eq!(raw.len(), 2 * RECORD_SIZE);

        let records = store.block_index_records().unwrap();
        assert_eq!(
            records[1],
            BlockIndexRecord {
                hash: b.hash(),
                height: 1,
                size: 83
            }
        );
        assert_eq!(store.read_block(&a.hash()).unwrap().unwrap(), a.to_bytes());

        store.clear_block_index().unwrap();
        assert_eq!(store.read_block_index().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_reopen_sees_persisted_data() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(tmp.path()).unwrap();
            store.write_header_log(&[9u8; HEADER_SIZE]).unwrap();
            store.write_block(&test_block(5), 0).unwrap();
        }
        let store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(store.read_header_log().unwrap().unwrap().len(), HEADER_SIZE);
        assert_eq!(store.block_index_records().unwrap().len(), 1);
    }
}
