//! # bitnode-network
//!
//! Peer-facing state the sync core reads and writes.
//!
//! This crate provides:
//! - Block inventories with plain/witness type tags
//! - Per-peer session state: outstanding requests, violation counters and
//!   the wake signal for the session's send loop
//! - The violation taxonomy and penalty scoring
//!
//! Sockets, message framing and connection lifecycle live with the caller.

mod inventory;
mod peer;
pub mod violation;

pub use inventory::{Inventory, InventoryType};
pub use peer::{Delivery, PeerId, PeerSession};
pub use violation::{Penalties, Severity, ViolationKind};
