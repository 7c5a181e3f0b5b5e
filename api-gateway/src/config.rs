//! API gateway configuration.
//!
//! The gateway reads the same JSON file as the monitor (named by
//! `SIGNWATCH_CONFIG`). Monitor settings sit at the top level; gateway
//! settings live under `"api"`.

use std::net::{Ipv4Addr, SocketAddr};

use serde::Deserialize;
use signwatch::{ConfigError, MonitorConfig};

/// Configuration for the API gateway HTTP server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    /// Delay between attempts to bootstrap a chain that is unreachable at
    /// startup.
    pub bootstrap_retry_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8081)),
            bootstrap_retry_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(flatten)]
    pub monitor: MonitorConfig,
    pub api: ApiConfig,
}

impl GatewayConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = signwatch::config::load_from_env()?;
        config.monitor.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_section_is_optional() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"chains":[],"storage":{"kind":"memory"},"metrics":{"enabled":false}}"#,
        )
        .unwrap();
        assert_eq!(config.api.listen_addr.port(), 8081);
        assert!(!config.monitor.metrics.enabled);

        let config: GatewayConfig =
            serde_json::from_str(r#"{"api":{"listen_addr":"127.0.0.1:9000"}}"#).unwrap();
        assert_eq!(config.api.listen_addr.port(), 9000);
        assert_eq!(config.api.bootstrap_retry_secs, 30);
    }
}
