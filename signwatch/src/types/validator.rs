//! Validators as seen through the staking and slashing modules.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConsensusAddress;

/// Staking bond status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BondStatus {
    Bonded,
    Unbonding,
    Unbonded,
    Unspecified,
}

impl BondStatus {
    /// Parses the staking module's `BOND_STATUS_*` rendering.
    pub fn from_chain(status: &str) -> Self {
        match status {
            "BOND_STATUS_BONDED" => BondStatus::Bonded,
            "BOND_STATUS_UNBONDING" => BondStatus::Unbonding,
            "BOND_STATUS_UNBONDED" => BondStatus::Unbonded,
            _ => BondStatus::Unspecified,
        }
    }
}

/// Slashing-module view of a validator.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SigningInfo {
    pub tombstoned: bool,
    /// Missed blocks as counted by the chain itself over its own window.
    pub missed_blocks_counter: i64,
    pub start_height: i64,
    pub jailed_until: Option<DateTime<Utc>>,
}

/// One staking participant.
///
/// Validators are replaced wholesale on every refresh and never mutated in
/// place, so a reader holding a clone always sees a consistent value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    /// Stable identity used for lookups and notifier subscriptions.
    pub operator_address: String,
    /// Key into per-block signature and active-set maps.
    pub consensus_address: ConsensusAddress,
    /// Bech32 `valcons` rendering of the consensus address.
    pub consensus_address_valcons: String,
    pub moniker: String,
    pub details: String,
    pub jailed: bool,
    pub status: BondStatus,
    /// Bonded tokens, as the chain's decimal string parsed to a float.
    pub tokens: f64,
    pub signing_info: Option<SigningInfo>,
}

impl Validator {
    /// Only bonded validators are in the active set.
    pub fn active(&self) -> bool {
        self.status == BondStatus::Bonded
    }

    pub fn tombstoned(&self) -> bool {
        self.signing_info
            .as_ref()
            .map(|info| info.tombstoned)
            .unwrap_or(false)
    }
}

/// Validators keyed by operator address, shared immutably between readers.
pub type ValidatorsMap = Arc<HashMap<String, Validator>>;
