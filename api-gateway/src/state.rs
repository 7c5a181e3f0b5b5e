//! Shared application state.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use signwatch::{ChainMonitor, Database, MetricsRegistry};

/// Shared state held by the API and background tasks.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor.
pub struct AppState {
    /// Every configured chain, bootstrapped or not.
    pub chains: Vec<String>,
    /// Monitors that finished bootstrapping, by chain name.
    pub monitors: RwLock<BTreeMap<String, Arc<ChainMonitor>>>,
    /// Database shared by every monitor and the notifier routes.
    pub database: Arc<dyn Database>,
    /// Metrics registry shared between the monitors and the exporter.
    pub metrics: Arc<MetricsRegistry>,
}

impl AppState {
    pub fn is_configured(&self, chain: &str) -> bool {
        self.chains.iter().any(|c| c == chain)
    }

    pub async fn monitor(&self, chain: &str) -> Option<Arc<ChainMonitor>> {
        self.monitors.read().await.get(chain).cloned()
    }

    pub async fn register(&self, monitor: Arc<ChainMonitor>) {
        self.monitors
            .write()
            .await
            .insert(monitor.chain().to_string(), monitor);
    }
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
