use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct ChainSummary {
    pub name: String,
    /// Whether the monitor finished bootstrapping.
    pub ready: bool,
    pub window: Option<i64>,
    pub store_blocks: Option<i64>,
    pub latest_height: Option<i64>,
    pub blocks_in_window: Option<i64>,
    pub validators: Option<usize>,
    /// Height of the newest committed snapshot.
    pub snapshot_height: Option<i64>,
}

/// `GET /chains`
pub async fn list_chains(State(state): State<SharedState>) -> Json<Vec<ChainSummary>> {
    let monitors = state.monitors.read().await;

    let summaries = state
        .chains
        .iter()
        .map(|name| match monitors.get(name) {
            Some(monitor) => {
                let chain_state = monitor.state();
                ChainSummary {
                    name: name.clone(),
                    ready: true,
                    window: Some(chain_state.window()),
                    store_blocks: Some(chain_state.store_blocks()),
                    latest_height: Some(chain_state.latest_height()),
                    blocks_in_window: Some(chain_state.blocks_in_window()),
                    validators: Some(chain_state.validators().len()),
                    snapshot_height: chain_state.snapshots().newer().map(|s| s.height),
                }
            }
            None => ChainSummary {
                name: name.clone(),
                ready: false,
                window: None,
                store_blocks: None,
                latest_height: None,
                blocks_in_window: None,
                validators: None,
                snapshot_height: None,
            },
        })
        .collect();

    Json(summaries)
}

#[derive(Debug, Serialize)]
pub struct GroupView {
    pub start: i64,
    pub end: i64,
    pub emoji: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatorView {
    pub operator_address: String,
    pub consensus_address: String,
    pub moniker: String,
    pub jailed: bool,
    pub tombstoned: bool,
    pub active: bool,
    pub signed: i64,
    pub missed: i64,
    pub proposed: i64,
    pub not_active: i64,
    pub group: Option<GroupView>,
}

#[derive(Debug, Serialize)]
pub struct ValidatorsResponse {
    pub chain: String,
    pub height: i64,
    pub window: i64,
    pub validators: Vec<ValidatorView>,
}

/// `GET /chains/{chain}/validators`
///
/// Returns every validator of the newest committed snapshot, most missed
/// blocks first.
pub async fn chain_validators(
    State(state): State<SharedState>,
    Path(chain): Path<String>,
) -> Result<Json<ValidatorsResponse>, (StatusCode, String)> {
    if !state.is_configured(&chain) {
        return Err((StatusCode::NOT_FOUND, format!("unknown chain {chain}")));
    }
    let monitor = state.monitor(&chain).await.ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("chain {chain} is still bootstrapping"),
        )
    })?;
    let snapshot = monitor.state().snapshots().newer().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("no snapshot for chain {chain} yet"),
        )
    })?;

    let groups = monitor.groups();
    let mut validators: Vec<ValidatorView> = snapshot
        .entries
        .values()
        .map(|entry| {
            let info = &entry.signature_info;
            let validator = &entry.validator;
            ValidatorView {
                operator_address: validator.operator_address.clone(),
                consensus_address: validator.consensus_address.to_string(),
                moniker: validator.moniker.clone(),
                jailed: validator.jailed,
                tombstoned: validator.tombstoned(),
                active: entry.is_active,
                signed: info.signed,
                missed: info.missed(),
                proposed: info.proposed,
                not_active: info.not_active,
                group: groups.get_group(info.missed()).ok().map(|g| GroupView {
                    start: g.start,
                    end: g.end,
                    emoji: g.emoji_start.clone(),
                    description: g.desc_start.clone(),
                }),
            }
        })
        .collect();
    validators.sort_by(|a, b| b.missed.cmp(&a.missed).then_with(|| a.moniker.cmp(&b.moniker)));

    Ok(Json(ValidatorsResponse {
        chain,
        height: snapshot.height,
        window: monitor.state().window(),
        validators,
    }))
}
