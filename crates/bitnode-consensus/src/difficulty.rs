//! Difficulty retargeting.
//!
//! Every `target_timespan / target_spacing` blocks the target is rescaled by
//! the time the previous interval actually took, clamped to a factor of four
//! either way and capped at the network proof-of-work limit. The arithmetic
//! is exact and truncating, so results match the reference chain bit for bit.

use crate::chain_params::ChainParams;
use crate::header::BlockHeader;
use crate::target::Target;
use crate::ConsensusResult;
use num_bigint::BigUint;
use tracing::debug;

/// Number of headers used for the median time past.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Difficulty retarget calculator.
#[derive(Debug, Clone)]
pub struct DifficultyOracle {
    /// Expected duration of one retarget interval in seconds.
    target_timespan: i64,
    /// Network proof-of-work limit.
    pow_limit: Target,
    /// Keep the previous target forever (regtest).
    no_retargeting: bool,
}

impl DifficultyOracle {
    /// Build from network parameters.
    pub fn new(params: &ChainParams) -> Self {
        Self {
            target_timespan: params.target_timespan as i64,
            pow_limit: params.pow_limit.clone(),
            no_retargeting: params.no_retargeting,
        }
    }

    /// Create with custom parameters (for testing).
    pub fn with_params(target_timespan: u32, pow_limit: Target) -> Self {
        Self {
            target_timespan: target_timespan as i64,
            pow_limit,
            no_retargeting: false,
        }
    }

    /// Clamp an observed timespan to `[timespan / 4, timespan * 4]`.
    pub fn clamp_timespan(&self, actual: i64) -> i64 {
        actual.clamp(self.target_timespan / 4, self.target_timespan * 4)
    }

    /// Target for the first block of the next interval, given the first and
    /// last header of the interval that just completed.
    pub fn next_target(&self, first: &BlockHeader, last: &BlockHeader) -> ConsensusResult<Target> {
        if self.no_retargeting {
            return Target::from_compact(last.bits);
        }

        let actual = last.time as i64 - first.time as i64;
        let timespan = self.clamp_timespan(actual);

        let current = Target::from_compact(last.bits)?;
        // Clamped timespan is always positive
        let mut next = current.as_biguint() * BigUint::from(timespan as u64);
        next /= BigUint::from(self.target_timespan as u64);

        let next = Target::new(next);
        let next = if next > self.pow_limit {
            self.pow_limit.clone()
        } else {
            next
        };

        debug!(
            actual_timespan = actual,
            clamped_timespan = timespan,
            old_bits = last.bits,
            new_bits = next.to_compact(),
            "Retargeted difficulty"
        );

        Ok(next)
    }
}

/// Median of the timestamps of up to [`MEDIAN_TIME_SPAN`] headers ending at
/// `index` (inclusive). Fewer are used close to genesis.
///
/// # Panics
/// Panics if `index` is out of bounds for `headers`.
pub fn median_time_past(headers: &[BlockHeader], index: usize) -> u32 {
    let start = (index + 1).saturating_sub(MEDIAN_TIME_SPAN);
    let mut times: Vec<u32> = headers[start..=index].iter().map(|h| h.time).collect();
    times.sort_unstable();
    times[times.len() / 2]
}
