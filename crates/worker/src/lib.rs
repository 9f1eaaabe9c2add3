//! Dedalus worker: runs individual tasks on a host.
//!
//! The master creates tasks over HTTP; each started task gets its own
//! supervisor that ensures the task's resources, spawns the executor
//! subprocess, captures its output and drives the task state machine,
//! persisting every step so the master can poll progress.

pub mod api;
pub mod config;
pub mod engine;
pub mod execution;
pub mod executors;
pub mod resources;
pub mod store;

use dedalus_core::ErrorCode;
use thiserror::Error;

pub use config::WorkerConfig;
pub use engine::WorkerEngine;

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the worker engine and its plugins.
#[derive(Debug, Error)]
pub enum Error {
    /// Model-level failure (forbidden transition, validation).
    #[error(transparent)]
    Model(#[from] dedalus_core::Error),

    /// The document store failed.
    #[error(transparent)]
    Store(#[from] dedalus_store::Error),

    /// No task with this id exists on this worker.
    #[error("task '{task_id}' not found")]
    TaskNotFound {
        /// The unknown id.
        task_id: String,
    },

    /// A malformed request (bad path segment, bad body).
    #[error("{message}")]
    InvalidRequest {
        /// What was wrong.
        message: String,
    },

    /// No executor plugin with this name is registered.
    #[error("executor '{name}' not found")]
    ExecutorNotFound {
        /// Requested plugin name.
        name: String,
    },

    /// No resource plugin with this name is registered.
    #[error("resource '{name}' not found")]
    ResourceNotFound {
        /// Requested plugin name.
        name: String,
    },

    /// The registered plugin versions are all older than the task requires.
    #[error("plugin '{name}' v{available} does not satisfy required minimum v{needed}")]
    PluginVersionNotFound {
        /// Plugin name.
        name: String,
        /// Minimum version the task asked for.
        needed: semver::Version,
        /// Newest version actually registered.
        available: semver::Version,
    },

    /// A plugin rejected its config blob.
    #[error("invalid config for plugin '{plugin}': {source}")]
    PluginConfig {
        /// Plugin name.
        plugin: String,
        /// Decode error.
        source: serde_json::Error,
    },

    /// A resource cannot be installed on this host.
    #[error("resource '{name}' is not installable: {reason}")]
    ResourceNonInstallable {
        /// Resource plugin name.
        name: String,
        /// Why installation is impossible.
        reason: String,
    },

    /// Filesystem or subprocess I/O failed.
    #[error("io error while {operation}: {source}")]
    Io {
        /// What the worker was doing.
        operation: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A resource download failed.
    #[error("download of '{url}' failed: {source}")]
    Download {
        /// Remote URL.
        url: String,
        /// Underlying error.
        source: reqwest::Error,
    },
}

impl Error {
    /// Map onto the API error taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Model(_)
            | Self::TaskNotFound { .. }
            | Self::InvalidRequest { .. }
            | Self::ExecutorNotFound { .. }
            | Self::ResourceNotFound { .. }
            | Self::PluginVersionNotFound { .. }
            | Self::PluginConfig { .. } => ErrorCode::AppError,
            Self::Store(_)
            | Self::ResourceNonInstallable { .. }
            | Self::Io { .. } => ErrorCode::BackendError,
            Self::Download { .. } => ErrorCode::BackendNetworkError,
        }
    }

    pub(crate) fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}
