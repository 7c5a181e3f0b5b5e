//! In-memory database.
//!
//! This implementation is useful for unit tests and monitors that are fine
//! with re-filling their window after a restart. All data lives in maps
//! behind one mutex.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::state::Snapshot;
use crate::types::{Block, Height};

use super::{Database, Notifier, StorageError};

#[derive(Default)]
struct MemInner {
    blocks: HashMap<String, BTreeMap<Height, Block>>,
    snapshots: HashMap<String, Snapshot>,
    notifiers: BTreeSet<Notifier>,
}

/// In-memory implementation of [`Database`].
#[derive(Default)]
pub struct InMemoryDatabase {
    inner: Mutex<MemInner>,
}

impl InMemoryDatabase {
    /// Creates a new, empty in-memory database.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the number of blocks stored for `chain`.
    pub fn block_count(&self, chain: &str) -> usize {
        self.lock().blocks.get(chain).map(BTreeMap::len).unwrap_or(0)
    }
}

impl Database for InMemoryDatabase {
    fn insert_block(&self, chain: &str, block: &Block) -> Result<(), StorageError> {
        self.lock()
            .blocks
            .entry(chain.to_string())
            .or_default()
            .entry(block.height)
            .or_insert_with(|| block.clone());
        Ok(())
    }

    fn get_all_blocks(&self, chain: &str) -> Result<BTreeMap<Height, Block>, StorageError> {
        Ok(self.lock().blocks.get(chain).cloned().unwrap_or_default())
    }

    fn trim_blocks_before(&self, chain: &str, height: Height) -> Result<(), StorageError> {
        if let Some(blocks) = self.lock().blocks.get_mut(chain) {
            blocks.retain(|h, _| *h > height);
        }
        Ok(())
    }

    fn get_last_snapshot(&self, chain: &str) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.lock().snapshots.get(chain).cloned())
    }

    fn set_snapshot(&self, chain: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.lock()
            .snapshots
            .insert(chain.to_string(), snapshot.clone());
        Ok(())
    }

    fn insert_notifier(&self, notifier: &Notifier) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let exists = inner.notifiers.iter().any(|n| same_subscription(n, notifier));
        if exists {
            return Ok(false);
        }
        inner.notifiers.insert(notifier.clone());
        Ok(true)
    }

    fn remove_notifier(&self, notifier: &Notifier) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let before = inner.notifiers.len();
        inner.notifiers.retain(|n| !same_subscription(n, notifier));
        Ok(inner.notifiers.len() != before)
    }

    fn get_notifiers(
        &self,
        chain: &str,
        operator_address: &str,
        reporter: &str,
    ) -> Result<Vec<Notifier>, StorageError> {
        Ok(self
            .lock()
            .notifiers
            .iter()
            .filter(|n| {
                n.chain == chain && n.operator_address == operator_address && n.reporter == reporter
            })
            .cloned()
            .collect())
    }
}

/// Notifiers are keyed by everything except the display name.
fn same_subscription(a: &Notifier, b: &Notifier) -> bool {
    a.chain == b.chain
        && a.operator_address == b.operator_address
        && a.reporter == b.reporter
        && a.user_id == b.user_id
}
