//! Rolling window of confirmed blocks.
//!
//! [`BlockWindow`] keeps blocks keyed by height together with the latest
//! height seen, behind a single read-write lock. Signing statistics are a
//! pure recomputation over the stored heights, so blocks arriving out of
//! order (backfill finishing after live blocks) produce the same result as
//! in-order arrival.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{Block, Height, SignatureInfo, SigningFlag, Validator};

use super::error::StateError;

#[derive(Default)]
struct WindowInner {
    blocks: HashMap<Height, Block>,
    latest_height: Height,
}

/// Thread-safe store of blocks with height-window queries.
#[derive(Default)]
pub struct BlockWindow {
    inner: RwLock<WindowInner>,
}

impl BlockWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, WindowInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, WindowInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores the block unless one is already stored at its height; the
    /// first block for a height wins, as in every [`crate::storage::Database`].
    ///
    /// Returns `true` if the block advanced the latest height.
    pub fn add_block(&self, block: Block) -> bool {
        let mut inner = self.write();
        let height = block.height;
        if inner.blocks.contains_key(&height) {
            return false;
        }
        inner.blocks.insert(height, block);

        if height > inner.latest_height {
            inner.latest_height = height;
            true
        } else {
            false
        }
    }

    pub fn has_block_at_height(&self, height: Height) -> bool {
        self.read().blocks.contains_key(&height)
    }

    /// Highest height ever added, or 0 if the window is empty.
    pub fn latest_height(&self) -> Height {
        self.read().latest_height
    }

    pub fn len(&self) -> usize {
        self.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().blocks.is_empty()
    }

    /// Deletes every block at or below `height`.
    pub fn trim_before(&self, height: Height) {
        self.write().blocks.retain(|h, _| *h > height);
    }

    /// Counts the stored heights among the most recent `window` heights.
    pub fn count_since_latest(&self, window: i64) -> i64 {
        let inner = self.read();
        let lowest = inner.latest_height - window;
        inner
            .blocks
            .keys()
            .filter(|h| **h > lowest && **h <= inner.latest_height)
            .count() as i64
    }

    /// Lists the heights among the most recent `window` heights that are
    /// not stored yet, highest first. Non-positive heights are never
    /// reported since they cannot exist on chain.
    pub fn missing_since_latest(&self, window: i64) -> Vec<Height> {
        let inner = self.read();
        let lowest = (inner.latest_height - window).max(0);
        ((lowest + 1)..=inner.latest_height)
            .rev()
            .filter(|h| !inner.blocks.contains_key(h))
            .collect()
    }

    /// Recomputes `validator`'s signing statistics over the most recent
    /// `window` heights.
    ///
    /// Fails only when no block at all is stored in the window; a validator
    /// that missed every stored block is a valid, non-error result.
    pub fn validator_signature_info(
        &self,
        validator: &Validator,
        window: i64,
    ) -> Result<SignatureInfo, StateError> {
        let inner = self.read();
        let address = &validator.consensus_address;

        let mut info = SignatureInfo::default();
        let mut blocks_seen = 0;

        let lowest = inner.latest_height - window;
        let mut height = inner.latest_height;

        while height > lowest {
            if let Some(block) = inner.blocks.get(&height) {
                blocks_seen += 1;

                if block.is_proposed_by(address) {
                    info.proposed += 1;
                }

                if !block.is_active(address) {
                    info.not_active += 1;
                } else {
                    match block.signature(address) {
                        None => info.no_signature += 1,
                        Some(SigningFlag::Signed) => info.signed += 1,
                        Some(SigningFlag::Absent | SigningFlag::Other) => info.not_signed += 1,
                    }
                }
            }
            height -= 1;
        }

        if blocks_seen == 0 {
            return Err(StateError::NoBlocksInWindow {
                latest: inner.latest_height,
                window,
            });
        }

        Ok(info)
    }
}
