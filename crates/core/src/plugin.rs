//! Descriptors for pluggable executors and resources.
//!
//! A task names the plugin it wants (`name` + minimal version) and hands it
//! an opaque config blob; the worker decodes that blob against the plugin's
//! typed config when it constructs the plugin.

use semver::Version;
use serde::{Deserialize, Serialize};

fn zero_version() -> Version {
    Version::new(0, 0, 0)
}

/// What runs a task: an executor plugin reference plus its config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    /// Executor plugin name, e.g. `shell`.
    pub name: String,
    /// Lowest plugin version the task accepts.
    #[serde(default = "zero_version")]
    pub min_version: Version,
    /// Plugin-specific configuration, decoded by the plugin itself.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Default for ExecutorSpec {
    fn default() -> Self {
        Self {
            name: "shell".to_string(),
            min_version: zero_version(),
            config: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Something a task needs on the host before it can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource plugin name, e.g. `local_file`.
    pub name: String,
    /// Lowest plugin version the task accepts.
    #[serde(default = "zero_version")]
    pub min_version: Version,
    /// Plugin-specific configuration, decoded by the plugin itself.
    #[serde(default)]
    pub config: serde_json::Value,
}
