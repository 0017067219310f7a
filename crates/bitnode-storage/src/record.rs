//! Fixed-size block index records.

use crate::{StorageError, StorageResult};
use bitnode_consensus::BlockHash;

/// Size of one serialized [`BlockIndexRecord`].
pub const RECORD_SIZE: usize = 32 + 4 + 4;

/// One entry of the block index: which block was stored at which height.
///
/// The index holds exactly one record per applied block, genesis included,
/// so `record count - 1` is the block-validated height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndexRecord {
    /// Block hash, internal byte order.
    pub hash: BlockHash,
    /// Height the block was applied at.
    pub height: u32,
    /// Serialized block size in bytes.
    pub size: u32,
}

impl BlockIndexRecord {
    /// Serialize as `hash || height (LE) || size (LE)`.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..32].copy_from_slice(self.hash.as_bytes());
        out[32..36].copy_from_slice(&self.height.to_le_bytes());
        out[36..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Parse a single record.
    pub fn from_bytes(data: &[u8]) -> StorageResult<Self> {
        if data.len() != RECORD_SIZE {
            return Err(StorageError::Corrupted(format!(
                "block index record is {} bytes, expected {}",
                data.len(),
                RECORD_SIZE
            )));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&data[..32]);
        let mut word = [0u8; 4];
        word.copy_from_slice(&data[32..36]);
        let height = u32::from_le_bytes(word);
        word.copy_from_slice(&data[36..]);
        let size = u32::from_le_bytes(word);
        Ok(Self {
            hash: BlockHash(hash),
            height,
            size,
        })
    }

    /// Parse a whole index file.
    pub fn parse_all(data: &[u8]) -> StorageResult<Vec<Self>> {
        if data.len() % RECORD_SIZE != 0 {
            return Err(StorageError::Corrupted(format!(
                "block index length {} is not a multiple of {}",
                data.len(),
                RECORD_SIZE
            )));
        }
        data.chunks_exact(RECORD_SIZE).map(Self::from_bytes).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let record = BlockIndexRecord {
            hash: BlockHash([7u8; 32]),
            height: 0x0102_0304,
            size: 285,
        };
        let bytes = record.to_bytes();
        assert_eq!(&bytes[..32], &[7u8; 32]);
        assert_eq!(&bytes[32..36], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[36..], &285u32.to_le_bytes());
        assert_eq!(BlockIndexRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_parse_all_rejects_partial_record() {
        let record = BlockIndexRecord {
            hash: BlockHash::ZERO,
            height: 0,
            size: 80,
        };
        let mut data = record.to_bytes().to_vec();
        data.extend_from_slice(&record.to_bytes());
        assert_eq!(BlockIndexRecord::parse_all(&data).unwrap().len(), 2);

        data.pop();
        assert!(matches!(
            BlockIndexRecord::parse_all(&data),
            Err(StorageError::Corrupted(_))
        ));
    }
}
