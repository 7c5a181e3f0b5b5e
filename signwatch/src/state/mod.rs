//! Block window state, validator set, and committed snapshots.
//!
//! This module provides:
//!
//! - the rolling block window and signature accounting ([`window`]),
//! - point-in-time snapshots and the older/newer pair kept for diffing
//!   ([`snapshot`]),
//! - a per-chain [`StateManager`] that mirrors everything into a
//!   [`crate::storage::Database`].

pub mod error;
pub mod manager;
pub mod snapshot;
pub mod window;

pub use error::StateError;
pub use manager::StateManager;
pub use snapshot::{Entry, SkipReason, Snapshot, SnapshotOutcome, SnapshotPair};
pub use window::BlockWindow;
