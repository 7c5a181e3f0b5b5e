//! Top-level configuration for the monitor.
//!
//! This module aggregates configuration for:
//!
//! - the monitored chains (`ChainConfig`): endpoint pools, window and
//!   group overrides, timeouts and reconnect intervals,
//! - storage (`StorageConfig`): RocksDB or in-memory,
//! - the metrics exporter (`MetricsConfig`).
//!
//! Configuration is read from a JSON file named by the
//! [`CONFIG_ENV_VAR`] environment variable. Every field has a default, so
//! a file only needs to list its chains. [`MonitorConfig::validate`] must
//! pass before anything is started.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::classifier::{ClassifierError, MissedBlocksGroups};
use crate::storage::RocksDbConfig;

/// Environment variable holding the path of the JSON config file.
pub const CONFIG_ENV_VAR: &str = "SIGNWATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("chain {chain}: {source}")]
    Groups {
        chain: String,
        source: ClassifierError,
    },
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Reads a JSON config file into `T`.
pub fn load_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

/// Reads the file named by [`CONFIG_ENV_VAR`], or returns `T::default()`
/// when the variable is unset.
pub fn load_from_env<T: DeserializeOwned + Default>() -> Result<T, ConfigError> {
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) if !path.trim().is_empty() => load_file(path.trim()),
        _ => Ok(T::default()),
    }
}

/// Where the monitor persists blocks, snapshots and notifiers.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Nothing survives a restart.
    Memory,
    Rocksdb(RocksDbConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Rocksdb(RocksDbConfig::default())
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9898)),
        }
    }
}

/// One monitored chain.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Key for storage, metrics and the API.
    pub name: String,
    pub lcd_endpoints: Vec<String>,
    pub rpc_endpoints: Vec<String>,
    /// Defaults to `<rpc endpoint>/websocket` for every RPC endpoint.
    pub websocket_endpoints: Vec<String>,
    /// Connect to websockets over TLS regardless of their URL scheme.
    pub use_tls: bool,
    /// Bech32 prefix of consensus addresses; defaults to `<name>valcons`.
    pub consensus_prefix: Option<String>,
    /// Taken from the chain's slashing params when unset.
    pub blocks_window: Option<i64>,
    /// Heights kept in memory and storage; defaults to the window.
    pub store_blocks: Option<i64>,
    /// Generated from the default breakpoints when unset.
    pub missed_blocks_groups: Option<MissedBlocksGroups>,
    pub query_timeout_secs: u64,
    pub populate_interval_secs: u64,
    pub reconnect_backoff_secs: u64,
    pub reconnect_delay_secs: u64,
    pub stale_timeout_secs: u64,
    pub dedup_capacity: usize,
    pub backfill_concurrency: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            lcd_endpoints: Vec::new(),
            rpc_endpoints: Vec::new(),
            websocket_endpoints: Vec::new(),
            use_tls: false,
            consensus_prefix: None,
            blocks_window: None,
            store_blocks: None,
            missed_blocks_groups: None,
            query_timeout_secs: 10,
            populate_interval_secs: 30,
            reconnect_backoff_secs: 60,
            reconnect_delay_secs: 5,
            stale_timeout_secs: 60,
            dedup_capacity: 100,
            backfill_concurrency: 8,
        }
    }
}

impl ChainConfig {
    pub fn consensus_prefix(&self) -> String {
        self.consensus_prefix
            .clone()
            .unwrap_or_else(|| format!("{}valcons", self.name))
    }

    pub fn websocket_endpoints(&self) -> Vec<String> {
        if !self.websocket_endpoints.is_empty() {
            return self.websocket_endpoints.clone();
        }
        self.rpc_endpoints
            .iter()
            .map(|rpc| format!("{}/websocket", rpc.trim_end_matches('/')))
            .collect()
    }

    /// Stored range for a resolved window.
    pub fn store_blocks_for(&self, window: i64) -> i64 {
        self.store_blocks.unwrap_or(window).max(window)
    }

    /// Groups for a resolved window: the configured ones, or generated.
    pub fn groups_for(&self, window: i64) -> Result<MissedBlocksGroups, ConfigError> {
        let groups = self
            .missed_blocks_groups
            .clone()
            .unwrap_or_else(|| MissedBlocksGroups::generate(window));
        groups
            .validate(window)
            .map_err(|source| ConfigError::Groups {
                chain: self.name.clone(),
                source,
            })?;
        Ok(groups)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn populate_interval(&self) -> Duration {
        Duration::from_secs(self.populate_interval_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("chain name must not be empty"));
        }
        let name = &self.name;
        if self.lcd_endpoints.is_empty() {
            return Err(invalid(format!("chain {name}: no LCD endpoints")));
        }
        if self.rpc_endpoints.is_empty() {
            return Err(invalid(format!("chain {name}: no RPC endpoints")));
        }
        if self.query_timeout_secs == 0 {
            return Err(invalid(format!("chain {name}: query timeout must be positive")));
        }
        if self.populate_interval_secs == 0 {
            return Err(invalid(format!("chain {name}: populate interval must be positive")));
        }
        if self.stale_timeout_secs == 0 {
            return Err(invalid(format!("chain {name}: stale timeout must be positive")));
        }
        if self.dedup_capacity == 0 || self.backfill_concurrency == 0 {
            return Err(invalid(format!(
                "chain {name}: dedup capacity and backfill concurrency must be positive"
            )));
        }

        if let Some(window) = self.blocks_window {
            if window <= 0 {
                return Err(invalid(format!("chain {name}: blocks window must be positive")));
            }
            if let Some(store) = self.store_blocks {
                if store < window {
                    return Err(invalid(format!(
                        "chain {name}: store_blocks ({store}) is smaller than the window ({window})"
                    )));
                }
            }
            self.groups_for(window)?;
        }

        Ok(())
    }
}

/// Top-level configuration for the monitor.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub chains: Vec<ChainConfig>,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
}

impl MonitorConfig {
    /// Loads the config named by [`CONFIG_ENV_VAR`], or the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_from_env()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_file(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for chain in &self.chains {
            chain.validate()?;
            if !names.insert(chain.name.as_str()) {
                return Err(invalid(format!("chain {} is configured twice", chain.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MissedBlocksGroup;
    use std::io::Write;

    fn chain(name: &str) -> ChainConfig {
        ChainConfig {
            name: name.to_string(),
            lcd_endpoints: vec!["https://lcd.example.com".to_string()],
            rpc_endpoints: vec!["https://rpc.example.com/".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"chains":[{{"name":"cosmos",
                "lcd_endpoints":["https://lcd.example.com"],
                "rpc_endpoints":["https://rpc.example.com"]}}],
               "storage":{{"kind":"memory"}}}}"#
        )
        .unwrap();

        let config = MonitorConfig::from_file(file.path()).unwrap();
        config.validate().unwrap();

        assert!(matches!(config.storage, StorageConfig::Memory));
        assert!(config.metrics.enabled);
        let cosmos = &config.chains[0];
        assert_eq!(cosmos.query_timeout(), Duration::from_secs(10));
        assert_eq!(cosmos.reconnect_backoff(), Duration::from_secs(60));
        assert_eq!(cosmos.consensus_prefix(), "cosmosvalcons");
        assert_eq!(
            cosmos.websocket_endpoints(),
            vec!["https://rpc.example.com/websocket".to_string()]
        );
    }

    #[test]
    fn unknown_storage_kind_is_rejected() {
        let err = serde_json::from_str::<MonitorConfig>(r#"{"storage":{"kind":"postgres"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn store_blocks_never_shrinks_below_the_window() {
        let mut config = chain("cosmos");
        config.store_blocks = Some(50);
        assert_eq!(config.store_blocks_for(100), 100);
        config.store_blocks = Some(500);
        assert_eq!(config.store_blocks_for(100), 500);

        config.blocks_window = Some(100);
        config.store_blocks = Some(50);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn configured_groups_are_checked_against_the_window() {
        let group = |start, end| MissedBlocksGroup {
            start,
            end,
            emoji_start: "🔴".to_string(),
            desc_start: "is skipping".to_string(),
            emoji_end: "🟢".to_string(),
            desc_end: "is recovering".to_string(),
        };

        let mut config = chain("cosmos");
        config.blocks_window = Some(100);
        config.missed_blocks_groups = Some(MissedBlocksGroups(vec![group(0, 9), group(11, 100)]));
        assert!(matches!(config.validate(), Err(ConfigError::Groups { .. })));

        config.missed_blocks_groups = Some(MissedBlocksGroups(vec![group(0, 9), group(10, 100)]));
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_and_incomplete_chains_are_rejected() {
        let config = MonitorConfig {
            chains: vec![chain("cosmos"), chain("cosmos")],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut no_rpc = chain("osmosis");
        no_rpc.rpc_endpoints.clear();
        assert!(no_rpc.validate().is_err());
    }
}
