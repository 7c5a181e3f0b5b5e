//! Per-chain state: block window, validator set, and snapshots.
//!
//! [`StateManager`] owns the in-memory mirror of one chain's data and
//! writes every change through to the configured [`Database`]. Each piece
//! of in-memory state sits behind its own lock, independent of whatever
//! isolation the database provides:
//!
//! - blocks and the latest height: the [`BlockWindow`] read-write lock,
//! - the validator set: replaced wholesale under a read-write lock,
//! - the committed snapshot pair: a mutex.
//!
//! No lock is held across I/O other than the synchronous database call
//! that persists the value being written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, warn};

use crate::storage::Database;
use crate::types::{Block, Height, SignatureInfo, Validator, ValidatorsMap};

use super::error::StateError;
use super::snapshot::{Entry, SkipReason, Snapshot, SnapshotOutcome, SnapshotPair};
use super::window::BlockWindow;

pub struct StateManager {
    chain: String,
    /// Heights signing statistics are computed over.
    window: i64,
    /// Heights kept in memory and storage; at least `window`.
    store_blocks: i64,
    blocks: BlockWindow,
    validators: RwLock<ValidatorsMap>,
    snapshots: Mutex<SnapshotPair>,
    database: Arc<dyn Database>,
}

impl StateManager {
    pub fn new(
        chain: impl Into<String>,
        window: i64,
        store_blocks: i64,
        database: Arc<dyn Database>,
    ) -> Self {
        Self {
            chain: chain.into(),
            window,
            store_blocks: store_blocks.max(window),
            blocks: BlockWindow::new(),
            validators: RwLock::new(Arc::new(HashMap::new())),
            snapshots: Mutex::new(SnapshotPair::new()),
            database,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn window(&self) -> i64 {
        self.window
    }

    pub fn store_blocks(&self) -> i64 {
        self.store_blocks
    }

    fn snapshots_lock(&self) -> MutexGuard<'_, SnapshotPair> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restores blocks and the last committed snapshot from the database.
    ///
    /// Returns the number of blocks restored.
    pub fn load(&self) -> Result<usize, StateError> {
        let blocks = self.database.get_all_blocks(&self.chain)?;
        let count = blocks.len();
        for block in blocks.into_values() {
            self.blocks.add_block(block);
        }
        self.blocks
            .trim_before(self.blocks.latest_height() - self.store_blocks);

        if let Some(snapshot) = self.database.get_last_snapshot(&self.chain)? {
            debug!(chain = %self.chain, height = snapshot.height, "restored last snapshot");
            self.snapshots_lock().commit(snapshot);
        }

        Ok(count)
    }

    /// Stores a block and, if it is the new latest one, drops everything
    /// that fell out of the stored range.
    ///
    /// Returns `true` if the block advanced the latest height.
    pub fn add_block(&self, block: Block) -> Result<bool, StateError> {
        let latest = self.blocks.latest_height();
        if latest > 0 && block.height <= latest - self.store_blocks {
            debug!(chain = %self.chain, height = block.height, "ignoring block below stored range");
            return Ok(false);
        }

        self.database.insert_block(&self.chain, &block)?;

        let advanced = self.blocks.add_block(block);
        if advanced {
            let trim_height = self.blocks.latest_height() - self.store_blocks;
            self.blocks.trim_before(trim_height);
            if let Err(e) = self.database.trim_blocks_before(&self.chain, trim_height) {
                warn!(chain = %self.chain, height = trim_height, error = %e, "failed to trim stored blocks");
            }
        }

        Ok(advanced)
    }

    pub fn has_block_at_height(&self, height: Height) -> bool {
        self.blocks.has_block_at_height(height)
    }

    pub fn latest_height(&self) -> Height {
        self.blocks.latest_height()
    }

    /// Stored heights among the most recent `window` heights.
    pub fn blocks_in_window(&self) -> i64 {
        self.blocks.count_since_latest(self.window)
    }

    /// Heights in the window that still need to be fetched.
    pub fn missing_blocks(&self) -> Vec<Height> {
        self.blocks.missing_since_latest(self.window)
    }

    /// Heights in the whole stored range that still need to be fetched.
    pub fn missing_stored_blocks(&self) -> Vec<Height> {
        self.blocks.missing_since_latest(self.store_blocks)
    }

    /// Replaces the whole validator set.
    pub fn set_validators(&self, validators: HashMap<String, Validator>) {
        let validators = Arc::new(validators);
        *self
            .validators
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = validators;
    }

    pub fn validators(&self) -> ValidatorsMap {
        self.validators
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn signature_info(&self, validator: &Validator) -> Result<SignatureInfo, StateError> {
        self.blocks.validator_signature_info(validator, self.window)
    }

    /// Computes a snapshot of every validator at the latest height.
    pub fn take_snapshot(&self) -> SnapshotOutcome {
        let have = self.blocks_in_window();
        if have < self.window {
            return SnapshotOutcome::Skipped(SkipReason::NotEnoughBlocks {
                have,
                need: self.window,
            });
        }

        let validators = self.validators();
        if validators.is_empty() {
            return SnapshotOutcome::Skipped(SkipReason::NoValidators);
        }

        let mut snapshot = Snapshot::new(self.blocks.latest_height());
        for validator in validators.values() {
            let signature_info = match self.signature_info(validator) {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        chain = %self.chain,
                        operator = %validator.operator_address,
                        error = %e,
                        "skipping validator in snapshot"
                    );
                    continue;
                }
            };

            snapshot.entries.insert(
                validator.operator_address.clone(),
                Entry {
                    validator: validator.clone(),
                    signature_info,
                    is_active: validator.active(),
                },
            );
        }

        SnapshotOutcome::Ready(snapshot)
    }

    /// Persists `snapshot` as the last one and shifts the in-memory pair.
    ///
    /// Returns the pair after the commit.
    pub fn commit_snapshot(&self, snapshot: Snapshot) -> Result<SnapshotPair, StateError> {
        self.database.set_snapshot(&self.chain, &snapshot)?;

        let mut pair = self.snapshots_lock();
        pair.commit(snapshot);
        Ok(pair.clone())
    }

    pub fn snapshots(&self) -> SnapshotPair {
        self.snapshots_lock().clone()
    }
}
