//! Core domain types used by the monitor.
//!
//! This module defines the chain-facing data the monitor works with:
//! confirmed blocks with their per-validator signing flags, validators as
//! returned by the staking module, and the per-window signing aggregate
//! derived from stored blocks. The goal is to avoid passing raw JSON
//! values or naked strings through public APIs.

use serde::{Deserialize, Serialize};

/// Confirmed blocks and their signing data.
pub mod block;
/// Per-window signing aggregate.
pub mod signature;
/// Validators and their slashing-module signing info.
pub mod validator;

pub use block::{Block, SigningFlag};
pub use signature::SignatureInfo;
pub use validator::{BondStatus, SigningInfo, Validator, ValidatorsMap};

/// Block height. Heights are strictly positive on every supported chain.
pub type Height = i64;

/// Length in bytes of a Tendermint consensus address.
pub const CONSENSUS_ADDRESS_LEN: usize = 20;

/// Hex-encoded consensus address, the key of per-block signature maps.
///
/// Always stored upper-case, which is how Tendermint renders
/// `validator_address` and `proposer_address` in RPC responses.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ConsensusAddress(pub String);

impl ConsensusAddress {
    /// Normalises an arbitrary hex rendering into the canonical form.
    pub fn from_hex(hex_str: &str) -> Self {
        ConsensusAddress(hex_str.trim().to_ascii_uppercase())
    }

    /// Builds the address from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ConsensusAddress(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the raw address bytes, or `None` if the hex is malformed.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        hex::decode(&self.0).ok()
    }
}

impl std::fmt::Display for ConsensusAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consensus_address_is_normalised_to_upper_hex() {
        let addr = ConsensusAddress::from_hex(" abcdef0123 ");
        assert_eq!(addr.as_str(), "ABCDEF0123");
        assert_eq!(addr, ConsensusAddress::from_bytes(&[0xAB, 0xCD, 0xEF, 0x01, 0x23]));
    }

    #[test]
    fn malformed_hex_has_no_bytes() {
        assert!(ConsensusAddress("XYZ".to_string()).to_bytes().is_none());
    }
}
