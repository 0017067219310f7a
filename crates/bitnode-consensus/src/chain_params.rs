//! Per-network consensus parameters.

use crate::header::{Block, BlockHash, BlockHeader};
use crate::target::Target;
use crate::ConsensusError;
use bytes::Bytes;
use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Expected duration of a retarget interval (two weeks).
pub const TARGET_TIMESPAN: u32 = 14 * 24 * 60 * 60;

/// Expected time between blocks.
pub const TARGET_SPACING: u32 = 10 * 60;

/// How far ahead of local time a header timestamp may be.
pub const MAX_FUTURE_BLOCK_TIME: u32 = 2 * 60 * 60;

/// Merkle root shared by every network's genesis block, internal byte order.
const GENESIS_MERKLE_ROOT: [u8; 32] = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

/// Transaction count followed by the genesis coinbase transaction.
const GENESIS_BODY_HEX: &str = concat!(
    "01",
    "01000000",
    "01",
    "0000000000000000000000000000000000000000000000000000000000000000",
    "ffffffff",
    "4d",
    "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72",
    "206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73",
    "ffffffff",
    "01",
    "00f2052a01000000",
    "43",
    "4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4",
    "f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac",
    "00000000",
);

/// Supported networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

impl FromStr for Network {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ConsensusError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Consensus parameters for one network.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Which network these are for.
    pub network: Network,
    /// Genesis header (index 0 of every header chain).
    pub genesis: BlockHeader,
    /// Easiest allowed target.
    pub pow_limit: Target,
    /// Expected duration of one retarget interval in seconds.
    pub target_timespan: u32,
    /// Expected seconds between blocks.
    pub target_spacing: u32,
    /// Allowed clock drift for header timestamps.
    pub max_future_block_time: u32,
    /// Never change difficulty.
    pub no_retargeting: bool,
}

impl ChainParams {
    /// Bitcoin mainnet.
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            genesis: genesis_header(1231006505, 0x1d00ffff, 2083236893),
            pow_limit: Target::new((BigUint::one() << 224u32) - 1u32),
            target_timespan: TARGET_TIMESPAN,
            target_spacing: TARGET_SPACING,
            max_future_block_time: MAX_FUTURE_BLOCK_TIME,
            no_retargeting: false,
        }
    }

    /// Bitcoin testnet3.
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            genesis: genesis_header(1296688602, 0x1d00ffff, 414098458),
            ..Self::mainnet()
        }
    }

    /// Local regression-test network: trivial proof of work, fixed difficulty.
    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            genesis: genesis_header(1296688602, 0x207fffff, 2),
            pow_limit: Target::new((BigUint::one() << 255u32) - 1u32),
            no_retargeting: true,
            ..Self::mainnet()
        }
    }

    /// Parameters for `network`.
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    /// Blocks per retarget interval.
    pub fn difficulty_adjustment_interval(&self) -> u32 {
        self.target_timespan / self.target_spacing
    }

    /// Hash of the genesis header.
    pub fn genesis_hash(&self) -> BlockHash {
        self.genesis.hash()
    }

    /// Full genesis block.
    pub fn genesis_block(&self) -> Block {
        // The constant is valid hex; an empty body would only affect storage.
        let body = hex::decode(GENESIS_BODY_HEX).unwrap_or_default();
        Block::new(self.genesis.clone(), Bytes::from(body))
    }
}

fn genesis_header(time: u32, bits: u32, nonce: u32) -> BlockHeader {
    BlockHeader::new(1, BlockHash::ZERO, GENESIS_MERKLE_ROOT, time, bits, nonce)
}
