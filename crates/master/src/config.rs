//! Master configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Bind address of the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

/// Master daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// HTTP API bind address.
    pub api: ApiConfig,
    /// Path of the document store.
    pub store_path: PathBuf,
    /// Port used for cluster hosts that do not carry an explicit one.
    pub worker_port: u16,
    /// Supervisor tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Timeout for a single worker RPC in milliseconds.
    pub rpc_timeout_ms: u64,
    /// Scheduler poll interval in milliseconds.
    pub scheduler_interval_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            store_path: PathBuf::from("/tmp/dedalus-master-db"),
            worker_port: 8081,
            tick_interval_ms: 1_000,
            rpc_timeout_ms: 10_000,
            scheduler_interval_ms: 1_000,
        }
    }
}

impl MasterConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an [`Error::InvalidRequest`] if the file is unreadable or does
    /// not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| Error::InvalidRequest {
            message: format!("reading config {}: {err}", path.display()),
        })?;
        toml::from_str(&raw).map_err(|err| Error::InvalidRequest {
            message: format!("parsing config {}: {err}", path.display()),
        })
    }

    /// Supervisor tick interval.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Worker RPC timeout.
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Scheduler poll interval.
    #[must_use]
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config_fills_defaults() {
        let config: MasterConfig = toml::from_str(
            r#"
            tick_interval_ms = 250

            [api]
            host = "0.0.0.0"
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.worker_port, 8081);
    }
}
