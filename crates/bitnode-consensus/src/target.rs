//! Proof-of-work targets and the compact (nBits) encoding.
//!
//! The compact form is a base-256 float: the high byte is the size in bytes,
//! the low 23 bits the mantissa, bit 23 the sign. Encoding and decoding
//! follow the reference `SetCompact`/`GetCompact` routines bit for bit.

use crate::header::{BlockHash, BlockHeader};
use crate::{ConsensusError, ConsensusResult};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::fmt;

/// 256-bit proof-of-work target. Lower is harder.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Target(BigUint);

impl Target {
    /// Wrap an arbitrary-precision value.
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    /// Decode a compact target, rejecting negative and overflowing values.
    pub fn from_compact(bits: u32) -> ConsensusResult<Self> {
        let size = bits >> 24;
        let mut word = bits & 0x007f_ffff;

        let value = if size <= 3 {
            word >>= 8 * (3 - size);
            BigUint::from(word)
        } else {
            BigUint::from(word) << (8 * (size - 3))
        };

        if word != 0 && (bits & 0x0080_0000) != 0 {
            return Err(ConsensusError::NegativeTarget(bits));
        }
        if word != 0
            && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32))
        {
            return Err(ConsensusError::TargetOverflow(bits));
        }

        Ok(Self(value))
    }

    /// Encode as compact bits.
    pub fn to_compact(&self) -> u32 {
        let mut size = ((self.0.bits() + 7) / 8) as u32;
        let mut compact = if size <= 3 {
            // Fits in 24 bits, so the conversion cannot fail
            self.0.to_u32().unwrap_or(0) << (8 * (3 - size))
        } else {
            (&self.0 >> (8 * (size - 3))).to_u32().unwrap_or(0)
        };

        // The mantissa is signed; shift right if the sign bit would be set
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        compact | (size << 24)
    }

    /// Underlying integer.
    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// Whether the target is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Whether `hash`, read as a little-endian 256-bit integer, meets this target.
    pub fn is_met_by(&self, hash: &BlockHash) -> bool {
        BigUint::from_bytes_le(hash.as_bytes()) <= self.0
    }
}

impl From<BigUint> for Target {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({:#010x})", self.to_compact())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:064x}", self.0)
    }
}

/// Check that `hash` satisfies the compact target `bits` and that the
/// target is positive and within `pow_limit`.
pub fn check_proof_of_work(hash: &BlockHash, bits: u32, pow_limit: &Target) -> ConsensusResult<bool> {
    let target = Target::from_compact(bits)?;
    if target.is_zero() {
        return Err(ConsensusError::ZeroTarget(bits));
    }
    if &target > pow_limit {
        return Err(ConsensusError::AboveProofOfWorkLimit { bits });
    }
    Ok(target.is_met_by(hash))
}

/// Header-level target check: the declared target must decode, be at or
/// below `expected`, and the header hash must meet it.
pub fn verify_header_target(header: &BlockHeader, expected: &Target) -> bool {
    match Target::from_compact(header.bits) {
        Ok(declared) => {
            !declared.is_zero() && &declared <= expected && declared.is_met_by(&header.hash())
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn test_decode_genesis_bits() {
        let target = Target::from_compact(0x1d00ffff).unwrap();
        assert_eq!(target.as_biguint(), &(BigUint::from(0xffffu32) << 208));
    }

    #[test]
    fn test_compact_reference_vectors() {
        // Vectors from Bitcoin Core's arith_uint256 tests
        assert_eq!(Target::from_compact(0).unwrap().to_compact(), 0);
        assert_eq!(Target::from_compact(0x00123456).unwrap().to_compact(), 0);
        assert_eq!(Target::from_compact(0x01003456).unwrap().to_compact(), 0);
        assert_eq!(Target::from_compact(0x02000056).unwrap().to_compact(), 0);
        assert_eq!(Target::from_compact(0x03000000).unwrap().to_compact(), 0);
        assert_eq!(Target::from_compact(0x04000000).unwrap().to_compact(), 0);
        assert_eq!(Target::from_compact(0x00923456).unwrap().to_compact(), 0);
        assert_eq!(Target::from_compact(0x01803456).unwrap().to_compact(), 0);

        let t = Target::from_compact(0x01123456).unwrap();
        assert_eq!(t.as_biguint(), &BigUint::from(0x12u32));
        assert_eq!(t.to_compact(), 0x01120000);

        let t = Target::from_compact(0x02123456).unwrap();
        assert_eq!(t.as_biguint(), &BigUint::from(0x1234u32));
        assert_eq!(t.to_compact(), 0x02123400);

        let t = Target::from_compact(0x03123456).unwrap();
        assert_eq!(t.as_biguint(), &BigUint::from(0x123456u32));
        assert_eq!(t.to_compact(), 0x03123456);

        let t = Target::from_compact(0x04123456).unwrap();
        assert_eq!(t.as_biguint(), &BigUint::from(0x12345600u32));
        assert_eq!(t.to_compact(), 0x04123456);

        let t = Target::from_compact(0x05009234).unwrap();
        assert_eq!(t.as_biguint(), &BigUint::from(0x92340000u32));
        assert_eq!(t.to_compact(), 0x05009234);

        // 0x80 in the mantissa high byte forces a size bump
        assert_eq!(Target::new(BigUint::from(0x80u32)).to_compact(), 0x02008000);
    }

    #[test]
    fn test_negative_and_overflow_rejected() {
        assert_eq!(
            Target::from_compact(0x04923456),
            Err(ConsensusError::NegativeTarget(0x04923456))
        );
        assert_eq!(
            Target::from_compact(0xff123456),
            Err(ConsensusError::TargetOverflow(0xff123456))
        );
    }

    #[test]
    fn test_check_proof_of_work() {
        let limit = Target::new((BigUint::one() << 255u32) - 1u32);
        assert!(check_proof_of_work(&BlockHash::ZERO, 0x207fffff, &limit).unwrap());
        assert!(!check_proof_of_work(&BlockHash([0xff; 32]), 0x207fffff, &limit).unwrap());
        assert_eq!(
            check_proof_of_work(&BlockHash::ZERO, 0x01000000, &limit),
            Err(ConsensusError::ZeroTarget(0x01000000))
        );

        let tight = Target::from_compact(0x1d00ffff).unwrap();
        assert_eq!(
            check_proof_of_work(&BlockHash::ZERO, 0x207fffff, &tight),
            Err(ConsensusError::AboveProofOfWorkLimit { bits: 0x207fffff })
        );
    }
}
