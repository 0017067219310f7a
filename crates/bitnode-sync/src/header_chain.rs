//! In-memory header chain backed by the persisted header log.

use crate::validator::BlockValidator;
use crate::SyncResult;
use bitnode_consensus::{
    median_time_past, BlockHash, BlockHeader, ChainParams, ConsensusError, ConsensusResult,
    DifficultyOracle, Target, HEADER_SIZE,
};
use bitnode_storage::ChainStore;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a header was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderRejection {
    /// Does not build on the chain tail.
    #[error("previous hash {got} does not match tail {expected}")]
    PrevMismatch { expected: BlockHash, got: BlockHash },

    /// Not after the median time past.
    #[error("time {time} not after median time past {median}")]
    TimeTooOld { time: u32, median: u32 },

    /// Too far ahead of local time.
    #[error("time {time} too far ahead of local time {now}")]
    TimeTooNew { time: u32, now: u64 },

    /// Declared target or proof of work does not satisfy the expected target.
    #[error("proof of work does not meet target {expected_bits:#010x}")]
    BadProofOfWork { expected_bits: u32 },

    /// Expected target could not be computed.
    #[error("target error: {0}")]
    Target(#[from] ConsensusError),
}

/// Ordered, append-only list of validated headers; index 0 is genesis.
pub struct HeaderChain {
    params: ChainParams,
    oracle: DifficultyOracle,
    headers: Vec<BlockHeader>,
    index: HashMap<BlockHash, usize>,
}

impl HeaderChain {
    /// Chain holding only the genesis header.
    pub fn genesis_only(params: ChainParams) -> Self {
        let genesis = params.genesis.clone();
        let oracle = DifficultyOracle::new(&params);
        let mut chain = Self {
            params,
            oracle,
            headers: Vec::new(),
            index: HashMap::new(),
        };
        chain.push(genesis);
        chain
    }

    /// Load the header log, resetting it to genesis if it is missing or
    /// corrupted.
    pub fn load(params: ChainParams, store: &dyn ChainStore) -> SyncResult<Self> {
        let mut chain = Self::genesis_only(params);

        let data = match store.read_header_log()? {
            Some(data) => data,
            None => {
                info!("No header log, starting from genesis");
                chain.reset(store)?;
                return Ok(chain);
            }
        };

        match chain.decode_log(&data) {
            Ok(()) => {
                info!(headers = chain.len(), "Loaded header log");
            }
            Err(reason) => {
                warn!(%reason, bytes = data.len(), "Header log corrupted, resetting to genesis");
                chain.reset(store)?;
            }
        }
        Ok(chain)
    }

    fn decode_log(&mut self, data: &[u8]) -> Result<(), String> {
        if data.is_empty() || data.len() % HEADER_SIZE != 0 {
            return Err(format!("length {} is not a multiple of {}", data.len(), HEADER_SIZE));
        }

        let mut chunks = data.chunks_exact(HEADER_SIZE);
        let first = chunks
            .next()
            .map(BlockHeader::from_bytes)
            .transpose()
            .map_err(|e| e.to_string())?;
        if first.as_ref() != Some(&self.params.genesis) {
            return Err("first header is not the genesis header".to_string());
        }

        for chunk in chunks {
            let header = BlockHeader::from_bytes(chunk).map_err(|e| e.to_string())?;
            let tail = self.tail_hash();
            if header.prev_block_hash != tail {
                let at = self.len();
                self.truncate(1);
                return Err(format!("header {at} does not link to its predecessor"));
            }
            self.push(header);
        }
        Ok(())
    }

    fn reset(&mut self, store: &dyn ChainStore) -> SyncResult<()> {
        self.truncate(1);
        store.write_header_log(&self.params.genesis.to_bytes())?;
        Ok(())
    }

    fn push(&mut self, header: BlockHeader) {
        self.index.insert(header.hash(), self.headers.len());
        self.headers.push(header);
    }

    fn truncate(&mut self, len: usize) {
        for header in self.headers.drain(len..) {
            self.index.remove(&header.hash());
        }
    }

    /// Network parameters.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Number of headers, genesis included.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Always false: genesis is never removed.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// All headers in chain order.
    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    /// Header at `index`.
    pub fn get(&self, index: usize) -> Option<&BlockHeader> {
        self.headers.get(index)
    }

    /// Hash of the header at `index`.
    pub fn hash_at(&self, index: usize) -> Option<BlockHash> {
        self.headers.get(index).map(BlockHeader::hash)
    }

    /// Last header.
    pub fn last(&self) -> &BlockHeader {
        // Never empty: constructed with genesis and truncated to at least one.
        &self.headers[self.headers.len() - 1]
    }

    fn tail_hash(&self) -> BlockHash {
        self.last().hash()
    }

    /// Index of the header with this hash.
    pub fn position(&self, hash: &BlockHash) -> Option<usize> {
        self.index.get(hash).copied()
    }

    /// Position a header building on `prev_hash` would occupy.
    pub fn find_height(&self, prev_hash: &BlockHash) -> Option<usize> {
        self.position(prev_hash).map(|i| i + 1)
    }

    /// Target required of the header at `height` (at most `len()`).
    pub fn next_target(&self, height: usize) -> ConsensusResult<Target> {
        let height = height.min(self.headers.len());
        let Some(last) = height.checked_sub(1).map(|i| &self.headers[i]) else {
            return Target::from_compact(self.params.genesis.bits);
        };

        let interval = self.params.difficulty_adjustment_interval() as usize;
        if interval == 0 || height % interval != 0 {
            return Target::from_compact(last.bits);
        }

        let first = &self.headers[height - interval];
        self.oracle.next_target(first, last)
    }

    /// Median time past of the headers ending at `index`.
    pub fn median_time_past(&self, index: usize) -> u32 {
        median_time_past(&self.headers, index.min(self.headers.len() - 1))
    }

    /// Check that `header` may extend the chain tail.
    pub fn check_header(
        &self,
        header: &BlockHeader,
        now: u64,
        validator: &dyn BlockValidator,
    ) -> Result<(), HeaderRejection> {
        let expected = self.tail_hash();
        if header.prev_block_hash != expected {
            return Err(HeaderRejection::PrevMismatch {
                expected,
                got: header.prev_block_hash,
            });
        }

        let median = self.median_time_past(self.len() - 1);
        if header.time <= median {
            return Err(HeaderRejection::TimeTooOld {
                time: header.time,
                median,
            });
        }

        if header.time as u64 > now + self.params.max_future_block_time as u64 {
            return Err(HeaderRejection::TimeTooNew {
                time: header.time,
                now,
            });
        }

        let target = self.next_target(self.len())?;
        if !validator.verify_header(header, &target) {
            return Err(HeaderRejection::BadProofOfWork {
                expected_bits: target.to_compact(),
            });
        }
        Ok(())
    }

    /// Validate and append headers in memory until the first failure.
    ///
    /// Returns how many were appended and the rejection that stopped the
    /// run, if any. Nothing is persisted; see [`persist_from`](Self::persist_from).
    pub fn extend_checked(
        &mut self,
        headers: &[BlockHeader],
        now: u64,
        validator: &dyn BlockValidator,
    ) -> (usize, Option<HeaderRejection>) {
        for (accepted, header) in headers.iter().enumerate() {
            if let Err(reason) = self.check_header(header, now, validator) {
                debug!(height = self.len(), hash = %header.hash(), %reason, "Header rejected");
                return (accepted, Some(reason));
            }
            self.push(header.clone());
        }
        (headers.len(), None)
    }

    /// Append `headers[from..]` to the header log in one write.
    ///
    /// On I/O failure the in-memory chain is truncated back to `from`.
    pub fn persist_from(&mut self, from: usize, store: &dyn ChainStore) -> SyncResult<()> {
        if from >= self.headers.len() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity((self.headers.len() - from) * HEADER_SIZE);
        for header in &self.headers[from..] {
            header.write_to(&mut buf);
        }
        if let Err(e) = store.append_header_log(&buf) {
            warn!(error = %e, "Failed to persist headers, rolling back");
            self.truncate(from);
            return Err(e.into());
        }
        Ok(())
    }

    /// Append and persist headers that already passed [`check_header`](Self::check_header).
    pub fn append_validated(
        &mut self,
        headers: Vec<BlockHeader>,
        store: &dyn ChainStore,
    ) -> SyncResult<()> {
        let from = self.headers.len();
        for header in headers {
            self.push(header);
        }
        self.persist_from(from, store)
    }

    /// Block locator: hashes walking back from the tail, ten single steps then
    /// doubling, always ending at genesis.
    ///
    /// A fresh tail (younger than `freshness_secs`) is left out so the peer
    /// has to answer with at least one header.
    pub fn locator(&self, now: u64, freshness_secs: u64) -> Vec<BlockHash> {
        let mut index = self.headers.len() as i64 - 1;
        if now.saturating_sub(self.last().time as u64) <= freshness_secs {
            index -= 1;
        }

        let mut result = Vec::with_capacity(32);
        let mut step = 1i64;
        while index >= 0 {
            result.push(self.headers[index as usize].hash());
            if result.len() > 10 {
                step *= 2;
            }
            index -= step;
        }

        let genesis = self.headers[0].hash();
        if result.last() != Some(&genesis) {
            result.push(genesis);
        }
        result
    }

    /// Headers a peer is missing, given its locator.
    ///
    /// Starts right after the first `known` hash we have (after genesis if
    /// none), returns at most `max` headers and stops after `stop`. With an
    /// empty `known` only the `stop` header itself is returned.
    pub fn missing_headers(
        &self,
        known: &[BlockHash],
        stop: &BlockHash,
        max: usize,
    ) -> Vec<BlockHeader> {
        if known.is_empty() {
            return self
                .position(stop)
                .map(|i| vec![self.headers[i].clone()])
                .unwrap_or_default();
        }

        let start = known
            .iter()
            .find_map(|hash| self.position(hash))
            .unwrap_or(0)
            + 1;

        let mut result = Vec::new();
        for header in self.headers.iter().skip(start).take(max) {
            result.push(header.clone());
            if &header.hash() == stop {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mine_header, mine_headers, MockValidator};
    use bitnode_storage::MemoryStore;

    fn regtest_chain(count: usize) -> (HeaderChain, MemoryStore) {
        let store = MemoryStore::new();
        let mut chain = HeaderChain::load(ChainParams::regtest(), &store).unwrap();
        let headers = mine_headers(chain.last(), count, 600);
        chain.append_validated(headers, &store).unwrap();
        (chain, store)
    }

    #[test]
    fn test_load_fresh_writes_genesis() {
        let store = MemoryStore::new();
        let chain = HeaderChain::load(ChainParams::regtest(), &store).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(
            store.header_log().unwrap(),
            ChainParams::regtest().genesis.to_bytes().to_vec()
        );
    }

    #[test]
    fn test_load_roundtrips_log() {
        let (chain, store) = regtest_chain(5);
        let reloaded = HeaderChain::load(ChainParams::regtest(), &store).unwrap();
        assert_eq!(reloaded.len(), 6);
        assert_eq!(reloaded.last(), chain.last());
        assert_eq!(reloaded.position(&chain.last().hash()), Some(5));
    }

    #[test]
    fn test_load_resets_corrupted_log() {
        let (_, store) = regtest_chain(3);
        let mut log = store.header_log().unwrap();
        log.truncate(log.len() - 1);
        let store = MemoryStore::with_header_log(log);

        let chain = HeaderChain::load(ChainParams::regtest(), &store).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(store.header_log().unwrap().len(), HEADER_SIZE);
    }

    #[test]
    fn test_load_resets_wrong_network_log() {
        let store = MemoryStore::with_header_log(ChainParams::mainnet().genesis.to_bytes().to_vec());
        let chain = HeaderChain::load(ChainParams::regtest(), &store).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.last(), &ChainParams::regtest().genesis);
    }

    #[test]
    fn test_find_height() {
        let (chain, _) = regtest_chain(3);
        assert_eq!(chain.find_height(&chain.hash_at(0).unwrap()), Some(1));
        assert_eq!(chain.find_height(&chain.hash_at(3).unwrap()), Some(4));
        assert_eq!(chain.find_height(&BlockHash([9; 32])), None);
    }

    #[test]
    fn test_check_header_rules() {
        let (chain, _) = regtest_chain(3);
        let validator = MockValidator::new();
        let tail = chain.last().clone();
        let now = tail.time as u64;

        let good = mine_header(&tail, tail.time + 1, tail.bits, 99);
        assert_eq!(chain.check_header(&good, now, &validator), Ok(()));

        let orphan = mine_header(chain.get(1).unwrap(), tail.time + 1, tail.bits, 99);
        assert!(matches!(
            chain.check_header(&orphan, now, &validator),
            Err(HeaderRejection::PrevMismatch { .. })
        ));

        let median = chain.median_time_past(chain.len() - 1);
        let stale = mine_header(&tail, median, tail.bits, 99);
        assert!(matches!(
            chain.check_header(&stale, now, &validator),
            Err(HeaderRejection::TimeTooOld { .. })
        ));

        let future = mine_header(&tail, tail.time + 7201, tail.bits, 99);
        assert!(matches!(
            chain.check_header(&future, now, &validator),
            Err(HeaderRejection::TimeTooNew { .. })
        ));
        let edge = mine_header(&tail, tail.time + 7200, tail.bits, 99);
        assert_eq!(chain.check_header(&edge, now, &validator), Ok(()));
    }

    #[test]
    fn test_check_header_rejects_easier_target() {
        let store = MemoryStore::new();
        let mut params = ChainParams::regtest();
        params.genesis = BlockHeader::new(1, BlockHash::ZERO, [0; 32], params.genesis.time, 0x2000ffff, 0);
        let chain = HeaderChain::load(params, &store).unwrap();
        let tail = chain.last().clone();

        // Declares the easier regtest limit while 0x2000ffff is required
        let easy = BlockHeader::new(1, tail.hash(), [0; 32], tail.time + 1, 0x207fffff, 0);
        assert!(matches!(
            chain.check_header(&easy, tail.time as u64, &MockValidator::new()),
            Err(HeaderRejection::BadProofOfWork { expected_bits: 0x2000ffff })
        ));
    }

    #[test]
    fn test_extend_checked_keeps_valid_prefix() {
        let (mut chain, store) = regtest_chain(0);
        let mut batch = mine_headers(chain.last(), 4, 600);
        batch[2].time = chain.last().time; // before median time past
        batch[2].rehash();
        let now = batch[3].time as u64;

        let (accepted, rejection) = chain.extend_checked(&batch, now, &MockValidator::new());
        assert_eq!(accepted, 2);
        assert!(rejection.is_some());

        chain.persist_from(1, &store).unwrap();
        assert_eq!(store.header_log().unwrap().len(), 3 * HEADER_SIZE);
    }

    #[test]
    fn test_persist_failure_rolls_back() {
        let (mut chain, store) = regtest_chain(2);
        let batch = mine_headers(chain.last(), 2, 600);
        store.set_fail_writes(true);
        assert!(chain.append_validated(batch.clone(), &store).is_err());
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.position(&batch[0].hash()), None);
    }

    #[test]
    fn test_next_target_retargets_on_boundary() {
        let store = MemoryStore::new();
        let mut params = ChainParams::regtest();
        params.no_retargeting = false;
        params.target_timespan = 4 * 600;
        params.target_spacing = 600;
        let mut chain = HeaderChain::load(params.clone(), &store).unwrap();
        chain
            .append_validated(mine_headers(chain.last(), 3, 600), &store)
            .unwrap();

        // Off-boundary heights keep the tail's target
        assert_eq!(chain.next_target(3).unwrap().to_compact(), 0x207fffff);

        // Interval took 3 spacings out of 4: target shrinks to 3/4
        let oracle = DifficultyOracle::new(&params);
        let expected = oracle.next_target(chain.get(0).unwrap(), chain.get(3).unwrap()).unwrap();
        assert_eq!(chain.next_target(4).unwrap(), expected);
        assert!(expected < Target::from_compact(0x207fffff).unwrap());
    }

    #[test]
    fn test_locator_shape() {
        let (chain, _) = regtest_chain(40);
        let stale_now = chain.last().time as u64 + 10 * 24 * 60 * 60;
        let locator = chain.locator(stale_now, 86_400);

        assert_eq!(locator[0], chain.last().hash());
        let positions: Vec<usize> = locator
            .iter()
            .map(|h| chain.position(h).unwrap())
            .collect();
        assert_eq!(positions[..11], [40, 39, 38, 37, 36, 35, 34, 33, 32, 31, 30]);
        assert_eq!(positions[11..], [28, 24, 16, 0]);
        assert_eq!(*locator.last().unwrap(), chain.hash_at(0).unwrap());
    }

    #[test]
    fn test_locator_omits_fresh_tail() {
        let (chain, _) = regtest_chain(3);
        let now = chain.last().time as u64 + 60;
        let locator = chain.locator(now, 86_400);
        assert_eq!(locator[0], chain.hash_at(2).unwrap());
        assert_eq!(locator.len(), 3);

        let genesis_only = HeaderChain::genesis_only(ChainParams::regtest());
        let now = genesis_only.last().time as u64;
        assert_eq!(genesis_only.locator(now, 86_400), vec![genesis_only.hash_at(0).unwrap()]);
    }

    #[test]
    fn test_missing_headers() {
        let (chain, _) = regtest_chain(10);
        let hash = |i: usize| chain.hash_at(i).unwrap();

        // Highest known candidate wins
        let got = chain.missing_headers(&[BlockHash([1; 32]), hash(6), hash(2)], &BlockHash::ZERO, 2000);
        assert_eq!(got.len(), 4);
        assert_eq!(got[0].hash(), hash(7));

        // Stops after the stop hash, capped by max
        let got = chain.missing_headers(&[hash(2)], &hash(5), 2000);
        assert_eq!(got.last().unwrap().hash(), hash(5));
        assert_eq!(got.len(), 3);
        assert_eq!(chain.missing_headers(&[hash(2)], &BlockHash::ZERO, 2).len(), 2);

        // Unknown candidates fall back to genesis
        let got = chain.missing_headers(&[BlockHash([1; 32])], &BlockHash::ZERO, 2000);
        assert_eq!(got.len(), 10);
        assert_eq!(got[0].hash(), hash(1));

        // Empty candidate set answers with the stop header only
        let got = chain.missing_headers(&[], &hash(4), 2000);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].hash(), hash(4));
        assert!(chain.missing_headers(&[], &BlockHash([1; 32]), 2000).is_empty());
    }
}
