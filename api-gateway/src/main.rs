// api-gateway/src/main.rs

//! API gateway binary.
//!
//! Runs one [`ChainMonitor`] per configured chain and exposes a small HTTP
//! API on top of them:
//!
//! - `GET /health`
//! - `GET /chains`
//! - `GET /chains/{chain}/validators`
//! - `POST /notifiers`, `DELETE /notifiers`
//! - `GET /notifiers/{chain}/{operator}`
//!
//! Prometheus metrics are served separately on `/metrics`.

mod config;
mod routes;
mod state;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::signal;
use tokio::sync::RwLock;

use signwatch::{
    ChainConfig, ChainMonitor, Database, LogReporter, MetricsRegistry, Reporter,
    run_prometheus_http_server,
};
use config::GatewayConfig;
use routes::{chains, health, notifiers};
use state::{AppState, SharedState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "api_gateway=info,signwatch=info".to_string()),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = GatewayConfig::load().map_err(|e| format!("failed to load config: {e}"))?;
    if config.monitor.chains.is_empty() {
        tracing::warn!("no chains configured; only the HTTP API will run");
    }

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new()
            .map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if config.monitor.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = config.monitor.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::error!("metrics HTTP server error: {e}");
            }
        });
        tracing::info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Storage
    // ---------------------------

    let database = signwatch::open_database(&config.monitor.storage)
        .map_err(|e| format!("failed to open database: {e}"))?;

    // ---------------------------
    // Shared state + monitors
    // ---------------------------

    let app_state: SharedState = Arc::new(AppState {
        chains: config
            .monitor
            .chains
            .iter()
            .map(|c| c.name.clone())
            .collect(),
        monitors: RwLock::new(BTreeMap::new()),
        database: database.clone(),
        metrics: metrics.clone(),
    });

    let retry = Duration::from_secs(config.api.bootstrap_retry_secs.max(1));
    for chain in config.monitor.chains.iter().cloned() {
        let state = app_state.clone();
        let database = database.clone();
        tokio::spawn(async move {
            run_chain(state, chain, database, retry).await;
        });
    }

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/chains", get(chains::list_chains))
        .route("/chains/{chain}/validators", get(chains::chain_validators))
        .route(
            "/notifiers",
            post(notifiers::subscribe).delete(notifiers::unsubscribe),
        )
        .route(
            "/notifiers/{chain}/{operator}",
            get(notifiers::list_notifiers),
        )
        .with_state(app_state);

    tracing::info!("API gateway listening on http://{}", config.api.listen_addr);

    let listener = tokio::net::TcpListener::bind(config.api.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", config.api.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("API server error: {e}"))?;

    Ok(())
}

/// Bootstraps one chain, retrying until its endpoints answer, then runs its
/// monitor loop. Configuration errors end the task without a retry.
async fn run_chain(
    state: SharedState,
    chain: ChainConfig,
    database: Arc<dyn Database>,
    retry: Duration,
) {
    let name = chain.name.clone();
    let monitor = loop {
        let reporters: Vec<Arc<dyn Reporter>> = vec![Arc::new(LogReporter::new(database.clone()))];
        match ChainMonitor::bootstrap(
            chain.clone(),
            database.clone(),
            reporters,
            Some(state.metrics.monitor.clone()),
        )
        .await
        {
            Ok(monitor) => break Arc::new(monitor),
            Err(e) if !e.is_retryable() => {
                tracing::error!(
                    chain = %name,
                    error = %e,
                    "invalid chain configuration, not monitoring this chain"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    chain = %name,
                    error = %e,
                    "failed to bootstrap chain, retrying in {}s",
                    retry.as_secs()
                );
                tokio::time::sleep(retry).await;
            }
        }
    };

    state.register(monitor.clone()).await;
    monitor.run().await;
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
