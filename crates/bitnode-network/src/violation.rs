//! Protocol violation taxonomy and scoring.
//!
//! Violations are recorded on the peer session; they never abort the sync
//! core. The connection layer reads the score to decide on disconnects.

use std::fmt;

/// Penalty points per severity.
pub struct Penalties;

impl Penalties {
    /// Ambiguous or ignorable behavior.
    pub const MINOR: u32 = 10;

    /// Invalid or out-of-order data.
    pub const MAJOR: u32 = 100;

    /// Score at which the peer should be dropped.
    pub const DISCONNECT_THRESHOLD: u32 = 100;

    /// Maximum penalty (saturates at this value).
    pub const MAX_PENALTY: u32 = 1000;
}

/// How bad a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recorded, nothing rejected.
    Minor,
    /// Recorded and the offending data rejected.
    Major,
}

impl Severity {
    /// Penalty points for this severity.
    pub fn penalty(&self) -> u32 {
        match self {
            Self::Minor => Penalties::MINOR,
            Self::Major => Penalties::MAJOR,
        }
    }
}

/// Peer misbehavior seen by the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Header batch does not attach to any known header.
    UnknownLocator,
    /// Header failed a consensus check.
    InvalidHeader,
    /// Requested block delivered ahead of an earlier request.
    OutOfOrderBlock,
    /// Unrequested block for a height we already have a header for.
    UnsolicitedBlock,
    /// Block failed validation.
    InvalidBlock,
}

impl ViolationKind {
    /// Severity of this violation.
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnknownLocator => Severity::Minor,
            Self::InvalidHeader
            | Self::OutOfOrderBlock
            | Self::UnsolicitedBlock
            | Self::InvalidBlock => Severity::Major,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownLocator => write!(f, "unknown locator"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::OutOfOrderBlock => write!(f, "out-of-order block"),
            Self::UnsolicitedBlock => write!(f, "unsolicited block"),
            Self::InvalidBlock => write!(f, "invalid block"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severities() {
        assert_eq!(ViolationKind::UnknownLocator.severity(), Severity::Minor);
        assert_eq!(ViolationKind::OutOfOrderBlock.severity(), Severity::Major);
        assert!(Severity::Major.penalty() >= Penalties::DISCONNECT_THRESHOLD);
        assert!(Severity::Minor.penalty() < Penalties::DISCONNECT_THRESHOLD);
    }
}
