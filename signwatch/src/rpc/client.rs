//! Typed chain queries on top of the [`QueryExecutor`].
//!
//! A [`ChainClient`] holds two executors, one over the chain's LCD
//! endpoints and one over its Tendermint RPC endpoints. Every method is a
//! single "decode + predicate" call through one of them, except the
//! fan-out helpers which issue many such calls concurrently and wait for
//! all of them.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use crate::query::{QueryError, QueryExecutor};
use crate::types::{
    Block, BondStatus, ConsensusAddress, Height, SigningFlag, SigningInfo, Validator,
};

use super::responses::{
    CommitResult, Lcd, LcdSigningInfo, Rpc, SigningInfoBody, SlashingParamsBody, StatusResult,
    ValidatorsBody, ValidatorsResult, consensus_addresses,
};

/// Page size for Tendermint `/validators`; the node caps it at 100.
pub const ACTIVE_SET_PAGE_SIZE: i64 = 100;

const VALIDATORS_PATH: &str = "/cosmos/staking/v1beta1/validators?pagination.limit=1000";
const SIGNING_INFO_PATH: &str = "/cosmos/slashing/v1beta1/signing_infos";
const SLASHING_PARAMS_PATH: &str = "/cosmos/slashing/v1beta1/params";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("invalid response for {query}: {message}")]
    InvalidResponse { query: &'static str, message: String },
}

impl ClientError {
    fn invalid(query: &'static str, message: impl Into<String>) -> Self {
        ClientError::InvalidResponse {
            query,
            message: message.into(),
        }
    }
}

/// Chain slashing parameters the monitor depends on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlashingParams {
    pub signed_blocks_window: i64,
}

pub struct ChainClient {
    chain: String,
    consensus_prefix: String,
    lcd: QueryExecutor,
    rpc: QueryExecutor,
}

fn rpc_result<T>(query: &'static str, response: Rpc<T>) -> Result<T, ClientError> {
    response
        .result
        .ok_or_else(|| ClientError::invalid(query, "missing result"))
}

fn signing_info_from(info: LcdSigningInfo) -> SigningInfo {
    SigningInfo {
        tombstoned: info.tombstoned,
        missed_blocks_counter: info.missed_blocks_counter,
        start_height: info.start_height,
        // The chain reports "never jailed" as the Unix epoch.
        jailed_until: info.jailed_until.filter(|t| *t > DateTime::<Utc>::UNIX_EPOCH),
    }
}

impl ChainClient {
    pub fn new(
        chain: impl Into<String>,
        consensus_prefix: impl Into<String>,
        lcd: QueryExecutor,
        rpc: QueryExecutor,
    ) -> Self {
        Self {
            chain: chain.into(),
            consensus_prefix: consensus_prefix.into(),
            lcd,
            rpc,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Fetches every validator, keyed by operator address.
    ///
    /// Validators whose consensus key cannot be turned into an address are
    /// logged and left out.
    pub async fn validators(&self) -> Result<HashMap<String, Validator>, ClientError> {
        let response = self
            .lcd
            .get::<Lcd<ValidatorsBody>, _>("validators", VALIDATORS_PATH, |r| {
                r.check()?;
                if r.body.validators.is_empty() {
                    return Err("no validators returned".to_string());
                }
                Ok(())
            })
            .await?;

        let mut validators = HashMap::with_capacity(response.value.body.validators.len());
        for raw in response.value.body.validators {
            let (consensus_address, consensus_address_valcons) =
                match consensus_addresses(&raw.consensus_pubkey, &self.consensus_prefix) {
                    Ok(addresses) => addresses,
                    Err(e) => {
                        warn!(chain = %self.chain, operator = %raw.operator_address, error = %e, "skipping validator");
                        continue;
                    }
                };

            validators.insert(
                raw.operator_address.clone(),
                Validator {
                    operator_address: raw.operator_address,
                    consensus_address,
                    consensus_address_valcons,
                    moniker: raw.description.moniker,
                    details: raw.description.details,
                    jailed: raw.jailed,
                    status: BondStatus::from_chain(&raw.status),
                    tokens: raw.tokens.parse().unwrap_or(0.0),
                    signing_info: None,
                },
            );
        }

        debug!(chain = %self.chain, count = validators.len(), host = %response.host, "fetched validators");
        Ok(validators)
    }

    pub async fn signing_info(&self, valcons: &str) -> Result<SigningInfo, ClientError> {
        let path = format!("{SIGNING_INFO_PATH}/{valcons}");
        let response = self
            .lcd
            .get::<Lcd<SigningInfoBody>, _>("signing_info", &path, |r| r.check())
            .await?;
        Ok(signing_info_from(response.value.body.val_signing_info))
    }

    /// Fetches signing info for every validator concurrently.
    ///
    /// A validator whose lookup fails keeps `signing_info: None`; the
    /// failure is logged and the rest of the batch is unaffected. Returns
    /// the number of failed lookups.
    pub async fn attach_signing_infos(&self, validators: &mut HashMap<String, Validator>) -> usize {
        let lookups = validators.values().map(|v| {
            let operator = v.operator_address.clone();
            let valcons = v.consensus_address_valcons.clone();
            async move { (operator, self.signing_info(&valcons).await) }
        });

        let mut failed = 0;
        for (operator, result) in join_all(lookups).await {
            match result {
                Ok(info) => {
                    if let Some(validator) = validators.get_mut(&operator) {
                        validator.signing_info = Some(info);
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(chain = %self.chain, %operator, error = %e, "failed to fetch signing info");
                }
            }
        }
        failed
    }

    /// Validators with their signing infos attached where available.
    pub async fn validators_with_signing_info(
        &self,
    ) -> Result<HashMap<String, Validator>, ClientError> {
        let mut validators = self.validators().await?;
        self.attach_signing_infos(&mut validators).await;
        Ok(validators)
    }

    pub async fn slashing_params(&self) -> Result<SlashingParams, ClientError> {
        let response = self
            .lcd
            .get::<Lcd<SlashingParamsBody>, _>("slashing_params", SLASHING_PARAMS_PATH, |r| {
                r.check()?;
                if r.body.params.signed_blocks_window <= 0 {
                    return Err("signed_blocks_window must be positive".to_string());
                }
                Ok(())
            })
            .await?;

        Ok(SlashingParams {
            signed_blocks_window: response.value.body.params.signed_blocks_window,
        })
    }

    pub async fn latest_height(&self) -> Result<Height, ClientError> {
        let response = self
            .rpc
            .get::<Rpc<StatusResult>, _>("status", "/status", |r| r.check())
            .await?;
        Ok(rpc_result("status", response.value)?
            .sync_info
            .latest_block_height)
    }

    /// Resolves a height into a [`Block`]: header and signatures from
    /// `/commit`, the active set from `/validators`, fetched concurrently.
    pub async fn block(&self, height: Height) -> Result<Block, ClientError> {
        let (commit, active_set) = tokio::try_join!(self.commit(height), self.active_set(height))?;

        let header = commit.signed_header.header;
        if header.height != height {
            return Err(ClientError::invalid(
                "block",
                format!("asked for height {height}, got {}", header.height),
            ));
        }

        let signatures: HashMap<ConsensusAddress, SigningFlag> = commit
            .signed_header
            .commit
            .signatures
            .iter()
            .filter(|sig| !sig.validator_address.is_empty())
            .map(|sig| {
                (
                    ConsensusAddress::from_hex(&sig.validator_address),
                    sig.block_id_flag.signing_flag(),
                )
            })
            .collect();

        Ok(Block {
            height,
            time: header.time,
            proposer: ConsensusAddress::from_hex(&header.proposer_address),
            signatures,
            validators: active_set,
        })
    }

    async fn commit(&self, height: Height) -> Result<CommitResult, ClientError> {
        let path = format!("/commit?height={height}");
        let response = self
            .rpc
            .get::<Rpc<CommitResult>, _>("block", &path, |r| r.check())
            .await?;
        rpc_result("block", response.value)
    }

    /// Consensus addresses of the validator set at `height`, across all
    /// pages.
    pub async fn active_set(&self, height: Height) -> Result<HashSet<ConsensusAddress>, ClientError> {
        let mut active = HashSet::new();
        let mut page = 1;

        loop {
            let path = format!(
                "/validators?height={height}&page={page}&per_page={ACTIVE_SET_PAGE_SIZE}"
            );
            let response = self
                .rpc
                .get::<Rpc<ValidatorsResult>, _>("active_set", &path, |r| {
                    r.check()?;
                    match &r.result {
                        Some(result) if result.validators.is_empty() => {
                            Err("empty validator page".to_string())
                        }
                        _ => Ok(()),
                    }
                })
                .await?;
            let result = rpc_result("active_set", response.value)?;

            active.extend(
                result
                    .validators
                    .iter()
                    .map(|v| ConsensusAddress::from_hex(&v.address)),
            );

            if active.len() as i64 >= result.total || page * ACTIVE_SET_PAGE_SIZE >= result.total {
                return Ok(active);
            }
            page += 1;
        }
    }
}
