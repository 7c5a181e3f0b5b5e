//! Signwatch library crate.
//!
//! This crate provides the building blocks of a proof-of-stake validator
//! signing monitor:
//!
//! - strongly-typed domain types (`types`),
//! - the block window, snapshots and per-chain state (`state`),
//! - missed-block severity groups (`classifier`),
//! - the snapshot diff engine and report delivery (`report`),
//! - resilient multi-endpoint queries (`query`) and the typed chain
//!   client built on them (`rpc`),
//! - the live new-block pipeline (`live`),
//! - storage backends (`storage`),
//! - Prometheus-based metrics (`metrics`),
//! - the per-chain monitor loop (`monitor`),
//! - and the top-level configuration (`config`).
//!
//! Binaries compose these pieces: one [`ChainMonitor`] per configured
//! chain, a shared [`Database`], and a [`MetricsRegistry`].

pub mod classifier;
pub mod config;
pub mod live;
pub mod metrics;
pub mod monitor;
pub mod query;
pub mod report;
pub mod rpc;
pub mod state;
pub mod storage;
pub mod types;

// Re-export top-level configuration types.
pub use config::{ChainConfig, ConfigError, MetricsConfig, MonitorConfig, StorageConfig};

pub use classifier::{ClassifierError, MissedBlocksGroup, MissedBlocksGroups};

pub use monitor::{ChainMonitor, MonitorError, ReportOutcome};

pub use report::{
    DiffError, DiffOutcome, EventKind, LogReporter, Report, ReportEvent, Reporter, ReporterError,
};

pub use state::{SkipReason, Snapshot, SnapshotOutcome, StateError, StateManager};

// Re-export storage backends.
pub use storage::{
    Database, InMemoryDatabase, Notifier, RocksDbConfig, RocksDbDatabase, StorageError,
};

// Re-export metrics registry and monitor metrics.
pub use metrics::{MetricsRegistry, MonitorMetrics, run_prometheus_http_server};

// Re-export domain types at the crate root for convenience.
pub use types::*;

/// Opens the database selected by `config`.
pub fn open_database(
    config: &StorageConfig,
) -> Result<std::sync::Arc<dyn Database>, StorageError> {
    Ok(match config {
        StorageConfig::Memory => std::sync::Arc::new(InMemoryDatabase::new()),
        StorageConfig::Rocksdb(cfg) => std::sync::Arc::new(RocksDbDatabase::open(cfg)?),
    })
}
