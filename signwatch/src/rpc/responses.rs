//! Wire shapes of the chain's LCD (REST) and Tendermint JSON-RPC answers.
//!
//! Only the fields the monitor reads are modelled. Cosmos encodes most
//! integers as JSON strings, so numeric fields go through
//! [`de_i64`], which accepts either form.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bech32::{ToBase32, Variant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};

use crate::types::{CONSENSUS_ADDRESS_LEN, ConsensusAddress, SigningFlag};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Number(i64),
    String(String),
}

pub(crate) fn de_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(n) => Ok(n),
        StringOrNumber::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// LCD
// ---------------------------------------------------------------------------

/// LCD envelope: gRPC-gateway errors carry a non-zero `code`.
#[derive(Debug, Deserialize)]
pub struct Lcd<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Lcd<T> {
    pub fn check(&self) -> Result<(), String> {
        if self.code != 0 {
            return Err(format!("code {}: {}", self.code, self.message));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidatorsBody {
    #[serde(default)]
    pub validators: Vec<LcdValidator>,
}

#[derive(Debug, Deserialize)]
pub struct LcdValidator {
    pub operator_address: String,
    pub consensus_pubkey: ConsensusPubkey,
    #[serde(default)]
    pub jailed: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tokens: String,
    #[serde(default)]
    pub description: Description,
}

#[derive(Debug, Default, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub moniker: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsensusPubkey {
    #[serde(rename = "@type")]
    pub kind: String,
    pub key: String,
}

impl ConsensusPubkey {
    pub fn is_ed25519(&self) -> bool {
        self.kind.ends_with("ed25519.PubKey")
    }

    /// Address bytes: SHA-256 of the raw key, truncated to 20 bytes.
    pub fn address_bytes(&self) -> Result<Vec<u8>, String> {
        let raw = STANDARD
            .decode(self.key.trim())
            .map_err(|e| format!("invalid base64 pubkey: {e}"))?;
        let digest = Sha256::digest(&raw);
        Ok(digest[..CONSENSUS_ADDRESS_LEN].to_vec())
    }
}

/// Hex and bech32 forms of a validator's consensus address.
pub fn consensus_addresses(
    pubkey: &ConsensusPubkey,
    prefix: &str,
) -> Result<(ConsensusAddress, String), String> {
    if !pubkey.is_ed25519() {
        return Err(format!("unsupported consensus key type {}", pubkey.kind));
    }
    let bytes = pubkey.address_bytes()?;
    let valcons = bech32::encode(prefix, bytes.to_base32(), Variant::Bech32)
        .map_err(|e| format!("cannot encode {prefix} address: {e}"))?;
    Ok((ConsensusAddress::from_bytes(&bytes), valcons))
}

#[derive(Debug, Deserialize)]
pub struct SigningInfoBody {
    pub val_signing_info: LcdSigningInfo,
}

#[derive(Debug, Deserialize)]
pub struct LcdSigningInfo {
    #[serde(default, deserialize_with = "de_i64")]
    pub start_height: i64,
    #[serde(default)]
    pub jailed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tombstoned: bool,
    #[serde(default, deserialize_with = "de_i64")]
    pub missed_blocks_counter: i64,
}

#[derive(Debug, Deserialize)]
pub struct SlashingParamsBody {
    pub params: LcdSlashingParams,
}

#[derive(Debug, Deserialize)]
pub struct LcdSlashingParams {
    #[serde(deserialize_with = "de_i64")]
    pub signed_blocks_window: i64,
}

// ---------------------------------------------------------------------------
// Tendermint JSON-RPC
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: String,
}

/// JSON-RPC envelope: exactly one of `result` and `error` is set.
#[derive(Debug, Deserialize)]
pub struct Rpc<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorBody>,
}

impl<T> Rpc<T> {
    pub fn check(&self) -> Result<(), String> {
        if let Some(error) = &self.error {
            return Err(format!(
                "rpc error {}: {} {}",
                error.code, error.message, error.data
            ));
        }
        if self.result.is_none() {
            return Err("rpc response has no result".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusResult {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
pub struct SyncInfo {
    #[serde(deserialize_with = "de_i64")]
    pub latest_block_height: i64,
}

#[derive(Debug, Deserialize)]
pub struct CommitResult {
    pub signed_header: SignedHeader,
}

#[derive(Debug, Deserialize)]
pub struct SignedHeader {
    pub header: Header,
    pub commit: Commit,
}

#[derive(Debug, Deserialize)]
pub struct Header {
    #[serde(deserialize_with = "de_i64")]
    pub height: i64,
    pub time: DateTime<Utc>,
    pub proposer_address: String,
}

#[derive(Debug, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub signatures: Vec<CommitSig>,
}

#[derive(Debug, Deserialize)]
pub struct CommitSig {
    pub block_id_flag: BlockIdFlag,
    #[serde(default)]
    pub validator_address: String,
}

/// Older nodes send the flag as a number, newer ones as an enum name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BlockIdFlag {
    Number(i64),
    Name(String),
}

impl BlockIdFlag {
    pub fn signing_flag(&self) -> SigningFlag {
        match self {
            BlockIdFlag::Number(n) => SigningFlag::from_block_id_flag(*n),
            BlockIdFlag::Name(name) => match name.parse::<i64>() {
                Ok(n) => SigningFlag::from_block_id_flag(n),
                Err(_) => SigningFlag::from_block_id_name(name),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidatorsResult {
    #[serde(default)]
    pub validators: Vec<RpcValidator>,
    #[serde(deserialize_with = "de_i64")]
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct RpcValidator {
    pub address: String,
}
