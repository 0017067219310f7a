//! # bitnode-tests
//!
//! Integration tests for the bitnode workspace.
//!
//! - Sync tests drive [`bitnode_sync::Chain`] through header and block sync
//! - Storage tests cover the flat-file store and restart recovery
//! - Property tests check retargeting, locators and download bookkeeping

pub mod generators;
pub mod harness;


#[cfg(test)]
mod storage_tests;


pub use generators::*;
pub use harness::*;
