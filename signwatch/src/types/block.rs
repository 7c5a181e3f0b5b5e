//! Block types.
//!
//! A [`Block`] is the monitor's view of one confirmed chain block: who
//! proposed it, which validators were in the active set at that height,
//! and the signing flag each of them left in the commit. Blocks are
//! immutable once constructed; a later fetch of the same height produces
//! a new value rather than mutating the stored one.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConsensusAddress, Height};

/// Per-validator commit flag for a single height.
///
/// Tendermint encodes this as `block_id_flag`: `1` absent, `2` commit,
/// `3` nil. Only a commit counts as a signature; any other explicit flag
/// is an explicit non-signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SigningFlag {
    Signed,
    Absent,
    Other,
}

impl SigningFlag {
    /// Maps a numeric Tendermint `block_id_flag`.
    pub fn from_block_id_flag(flag: i64) -> Self {
        match flag {
            2 => SigningFlag::Signed,
            1 => SigningFlag::Absent,
            _ => SigningFlag::Other,
        }
    }

    /// Maps the protobuf-JSON rendering (`"BLOCK_ID_FLAG_COMMIT"` etc.).
    pub fn from_block_id_name(name: &str) -> Self {
        match name {
            "BLOCK_ID_FLAG_COMMIT" => SigningFlag::Signed,
            "BLOCK_ID_FLAG_ABSENT" => SigningFlag::Absent,
            _ => SigningFlag::Other,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, SigningFlag::Signed)
    }
}

/// One confirmed chain block, keyed by height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Height of this block; the natural key everywhere blocks are stored.
    pub height: Height,

    /// Header time as reported by the chain.
    pub time: DateTime<Utc>,

    /// Consensus address of the proposer.
    pub proposer: ConsensusAddress,

    /// Commit flags left by validators for this height.
    ///
    /// A validator in the active set but missing from this map has no
    /// signing record at all for the height.
    pub signatures: HashMap<ConsensusAddress, SigningFlag>,

    /// Active validator set at this height.
    pub validators: HashSet<ConsensusAddress>,
}

impl Block {
    /// Returns `true` if `address` was in the active set at this height.
    pub fn is_active(&self, address: &ConsensusAddress) -> bool {
        self.validators.contains(address)
    }

    /// Returns the commit flag for `address`, if one was recorded.
    pub fn signature(&self, address: &ConsensusAddress) -> Option<SigningFlag> {
        self.signatures.get(address).copied()
    }

    pub fn is_proposed_by(&self, address: &ConsensusAddress) -> bool {
        &self.proposer == address
    }
}
