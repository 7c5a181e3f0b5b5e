//! Point-in-time views of every validator's signing statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Height, SignatureInfo, Validator};

/// One validator's state inside a [`Snapshot`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub validator: Validator,
    pub signature_info: SignatureInfo,
    pub is_active: bool,
}

/// All validators' statistics, tagged with the height they were computed at.
///
/// Entries are keyed by operator address. A `BTreeMap` keeps iteration
/// order stable, which the diff engine relies on for deterministic output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub height: Height,
    pub entries: BTreeMap<String, Entry>,
}

impl Snapshot {
    pub fn new(height: Height) -> Self {
        Self {
            height,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, operator_address: &str) -> Option<&Entry> {
        self.entries.get(operator_address)
    }
}

/// Why a snapshot could not be taken this cycle.
///
/// These are expected conditions while the monitor warms up, not failures.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// Fewer blocks than the window are stored.
    NotEnoughBlocks { have: i64, need: i64 },
    /// The validator set has not been fetched yet.
    NoValidators,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotEnoughBlocks { have, need } => {
                write!(f, "not enough blocks yet ({have}/{need})")
            }
            SkipReason::NoValidators => write!(f, "validators not fetched yet"),
        }
    }
}

/// Result of trying to take a snapshot.
#[derive(Clone, Debug)]
pub enum SnapshotOutcome {
    Ready(Snapshot),
    Skipped(SkipReason),
}

/// The two most recent committed snapshots.
#[derive(Clone, Debug, Default)]
pub struct SnapshotPair {
    older: Option<Arc<Snapshot>>,
    newer: Option<Arc<Snapshot>>,
}

impl SnapshotPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `snapshot` the newer side, shifting the previous newer one to
    /// the older side and dropping the previous older one.
    pub fn commit(&mut self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.older = self.newer.take();
        self.newer = Some(snapshot.clone());
        snapshot
    }

    pub fn older(&self) -> Option<Arc<Snapshot>> {
        self.older.clone()
    }

    pub fn newer(&self) -> Option<Arc<Snapshot>> {
        self.newer.clone()
    }

    /// Both sides, if two snapshots have been committed.
    pub fn both(&self) -> Option<(Arc<Snapshot>, Arc<Snapshot>)> {
        Some((self.older.clone()?, self.newer.clone()?))
    }
}
