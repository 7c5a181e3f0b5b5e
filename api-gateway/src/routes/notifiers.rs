use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use signwatch::{LogReporter, Notifier};

use crate::state::SharedState;

fn default_reporter() -> String {
    LogReporter::NAME.to_string()
}

/// Request body for `POST /notifiers` and `DELETE /notifiers`.
#[derive(Debug, Deserialize)]
pub struct NotifierRequest {
    pub chain: String,
    pub operator_address: String,
    /// Reporter the user is reachable through; defaults to the log reporter.
    #[serde(default = "default_reporter")]
    pub reporter: String,
    pub user_id: String,
    pub user_name: String,
}

impl From<NotifierRequest> for Notifier {
    fn from(req: NotifierRequest) -> Self {
        Notifier {
            chain: req.chain,
            operator_address: req.operator_address,
            reporter: req.reporter,
            user_id: req.user_id,
            user_name: req.user_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotifierResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ReporterQuery {
    #[serde(default = "default_reporter")]
    pub reporter: String,
}

#[derive(Debug, Serialize)]
pub struct NotifierView {
    pub user_id: String,
    pub user_name: String,
    pub reporter: String,
}

async fn check_target(
    state: &SharedState,
    chain: &str,
    operator: &str,
) -> Result<(), (StatusCode, String)> {
    if !state.is_configured(chain) {
        return Err((StatusCode::NOT_FOUND, format!("unknown chain {chain}")));
    }
    // Before the first validator fetch any operator is accepted.
    if let Some(monitor) = state.monitor(chain).await {
        let validators = monitor.state().validators();
        if !validators.is_empty() && !validators.contains_key(operator) {
            return Err((
                StatusCode::NOT_FOUND,
                format!("unknown validator {operator} on {chain}"),
            ));
        }
    }
    Ok(())
}

fn storage_error(e: signwatch::StorageError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// `POST /notifiers`
///
/// Subscribes a user to reports about one validator.
pub async fn subscribe(
    State(state): State<SharedState>,
    Json(body): Json<NotifierRequest>,
) -> Result<(StatusCode, Json<NotifierResponse>), (StatusCode, String)> {
    check_target(&state, &body.chain, &body.operator_address).await?;

    let notifier: Notifier = body.into();
    let inserted = state
        .database
        .insert_notifier(&notifier)
        .map_err(storage_error)?;

    tracing::info!(
        chain = %notifier.chain,
        operator = %notifier.operator_address,
        user = %notifier.user_name,
        inserted,
        "notifier subscribed"
    );

    Ok(if inserted {
        (StatusCode::CREATED, Json(NotifierResponse { status: "subscribed" }))
    } else {
        (
            StatusCode::OK,
            Json(NotifierResponse {
                status: "already subscribed",
            }),
        )
    })
}

/// `DELETE /notifiers`
pub async fn unsubscribe(
    State(state): State<SharedState>,
    Json(body): Json<NotifierRequest>,
) -> Result<(StatusCode, Json<NotifierResponse>), (StatusCode, String)> {
    let notifier: Notifier = body.into();
    let removed = state
        .database
        .remove_notifier(&notifier)
        .map_err(storage_error)?;

    if !removed {
        return Err((StatusCode::NOT_FOUND, "not subscribed".to_string()));
    }
    Ok((
        StatusCode::OK,
        Json(NotifierResponse {
            status: "unsubscribed",
        }),
    ))
}

/// `GET /notifiers/{chain}/{operator}?reporter=log`
pub async fn list_notifiers(
    State(state): State<SharedState>,
    Path((chain, operator)): Path<(String, String)>,
    Query(query): Query<ReporterQuery>,
) -> Result<Json<Vec<NotifierView>>, (StatusCode, String)> {
    if !state.is_configured(&chain) {
        return Err((StatusCode::NOT_FOUND, format!("unknown chain {chain}")));
    }

    let notifiers = state
        .database
        .get_notifiers(&chain, &operator, &query.reporter)
        .map_err(storage_error)?;

    Ok(Json(
        notifiers
            .into_iter()
            .map(|n| NotifierView {
                user_id: n.user_id,
                user_name: n.user_name,
                reporter: n.reporter,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use signwatch::{InMemoryDatabase, MetricsRegistry};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn state() -> SharedState {
        Arc::new(AppState {
            chains: vec!["cosmos".to_string()],
            monitors: RwLock::new(BTreeMap::new()),
            database: Arc::new(InMemoryDatabase::new()),
            metrics: Arc::new(MetricsRegistry::new().unwrap()),
        })
    }

    fn request(chain: &str) -> NotifierRequest {
        serde_json::from_value(serde_json::json!({
            "chain": chain,
            "operator_address": "cosmosvaloper1abc",
            "user_id": "42",
            "user_name": "alice",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn subscribe_list_and_unsubscribe() {
        let state = state();

        let (status, _) = subscribe(State(state.clone()), Json(request("cosmos")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let (status, Json(body)) = subscribe(State(state.clone()), Json(request("cosmos")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "already subscribed");

        let Json(listed) = list_notifiers(
            State(state.clone()),
            Path(("cosmos".to_string(), "cosmosvaloper1abc".to_string())),
            Query(ReporterQuery {
                reporter: default_reporter(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_name, "alice");

        let (status, _) = unsubscribe(State(state.clone()), Json(request("cosmos")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let err = unsubscribe(State(state), Json(request("cosmos")))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected() {
        let err = subscribe(State(state()), Json(request("osmosis")))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }
}
