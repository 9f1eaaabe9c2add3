//! Worker configuration.

use std::path::{Path, PathBuf};

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
            port: 8081,
        }
    }
}

/// Worker daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// HTTP API bind address.
    pub api: ApiConfig,
    /// Path of the task store.
    pub store_path: PathBuf,
    /// Root under which every execution gets its working directory.
    pub execution_data_root: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            store_path: PathBuf::from("/tmp/dedalus-worker-db"),
            execution_data_root: PathBuf::from("/tmp/dedalus-worker-data"),
        }
    }
}

impl WorkerConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is unreadable, or a model error if it
    /// does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| Error::io(format!("reading config {}", path.display()), source))?;
        toml::from_str(&raw).map_err(|err| {
            Error::io(
                format!("parsing config {}", path.display()),
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config_fills_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
            execution_data_root = "/srv/dedalus"

            [api]
            host = "0.0.0.0"
            port = 9001
            "#,
        )
        .unwrap();
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 9001);
        assert_eq!(config.execution_data_root, PathBuf::from("/srv/dedalus"));
        assert_eq!(config.store_path, PathBuf::from("/tmp/dedalus-worker-db"));
    }
}
