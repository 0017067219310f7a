//! Sync configuration.

use serde::{Deserialize, Serialize};

/// Sync tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Block hashes handed to a peer per refill.
    pub block_batch_size: usize,
    /// How far past the validated height an unsolicited block may be.
    pub solo_block_lookahead: u32,
    /// Tip age under which the header chain counts as fresh.
    pub header_freshness_secs: u64,
    /// Cap on headers returned for one getheaders request.
    pub max_headers_per_response: usize,
    /// Ask witness-capable peers for witness blocks.
    pub request_witness_blocks: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_batch_size: 16,
            solo_block_lookahead: 20,
            header_freshness_secs: 24 * 60 * 60,
            max_headers_per_response: 2000,
            request_witness_blocks: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SyncConfig = toml::from_str("block_batch_size = 4").unwrap();
        assert_eq!(config.block_batch_size, 4);
        assert_eq!(config.solo_block_lookahead, 20);
        assert!(config.request_witness_blocks);
    }
}
