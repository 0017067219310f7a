//! Block header and block types.
//!
//! A header is identified by the double SHA-256 of its fixed 80-byte
//! serialization. The identity is computed lazily and cached; mutating a
//! field does not touch the cache, callers must call [`BlockHeader::rehash`]
//! after changing a header they already hashed.

use crate::{ConsensusError, ConsensusResult};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Serialized size of a block header in bytes.
pub const HEADER_SIZE: usize = 80;

/// Double SHA-256 of `data`.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// 32-byte block hash in internal (little-endian) byte order.
///
/// `Display` and [`BlockHash::from_hex`] use the conventional reversed
/// byte order seen in block explorers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// The all-zero hash (previous hash of a genesis header).
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    /// Parse a hash from its reversed (explorer) hex form.
    pub fn from_hex(s: &str) -> ConsensusResult<Self> {
        let mut bytes = hex::decode(s).map_err(|e| ConsensusError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ConsensusError::InvalidHex(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        bytes.reverse();
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Raw bytes in internal order.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rev = self.0;
        rev.reverse();
        write!(f, "{}", hex::encode(rev))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Block header.
#[derive(Clone)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous header.
    pub prev_block_hash: BlockHash,
    /// Merkle root of the block's transactions.
    pub merkle_root: [u8; 32],
    /// Block time in seconds since the Unix epoch.
    pub time: u32,
    /// Compact proof-of-work target (nBits).
    pub bits: u32,
    /// Nonce.
    pub nonce: u32,
    /// Cached identity.
    hash: OnceLock<BlockHash>,
}

impl BlockHeader {
    /// Create a new header.
    pub fn new(
        version: i32,
        prev_block_hash: BlockHash,
        merkle_root: [u8; 32],
        time: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            time,
            bits,
            nonce,
            hash: OnceLock::new(),
        }
    }

    /// Header hash, computed on first use and cached afterwards.
    pub fn hash(&self) -> BlockHash {
        *self
            .hash
            .get_or_init(|| BlockHash(double_sha256(&self.to_bytes())))
    }

    /// Drop the cached hash and compute it again from the current fields.
    pub fn rehash(&mut self) -> BlockHash {
        self.hash = OnceLock::new();
        self.hash()
    }

    /// Serialize into the fixed 80-byte wire format.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block_hash.0);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Append the 80-byte serialization to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bytes());
    }

    /// Parse a header from exactly 80 bytes.
    pub fn from_bytes(data: &[u8]) -> ConsensusResult<Self> {
        if data.len() != HEADER_SIZE {
            return Err(ConsensusError::InvalidHeaderLength {
                got: data.len(),
                expected: HEADER_SIZE,
            });
        }
        let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let mut prev = [0u8; 32];
        prev.copy_from_slice(&data[4..36]);
        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&data[36..68]);

        Ok(Self::new(
            u32_at(0) as i32,
            BlockHash(prev),
            merkle,
            u32_at(68),
            u32_at(72),
            u32_at(76),
        ))
    }
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlockHeader {}

impl fmt::Debug for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHeader")
            .field("version", &self.version)
            .field("prev_block_hash", &self.prev_block_hash)
            .field("time", &self.time)
            .field("bits", &format_args!("{:#010x}", self.bits))
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// A full block: header plus the raw transaction payload.
///
/// Transactions are opaque here; parsing and script rules belong to the
/// block validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,
    /// Serialized transactions (count prefix included).
    pub body: Bytes,
}

impl Block {
    /// Create a block.
    pub fn new(header: BlockHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Block hash (the header hash).
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Hash of the block this one builds on.
    pub fn prev_hash(&self) -> BlockHash {
        self.header.prev_block_hash
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Serialize header followed by body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.body);
        out
    }
}
