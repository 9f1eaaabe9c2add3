//! Dedalus master: orchestrates versioned task graphs across workers.
//!
//! The master persists graph definitions and instance state, runs one
//! supervisor per running graph instance that walks the dependency DAG and
//! dispatches ready tasks to workers, and exposes the whole thing over HTTP.

pub mod api;
pub mod config;
pub mod engine;
pub mod executor;
pub mod mentor;
pub mod scheduler;
pub mod store;
pub mod worker_client;

use dedalus_core::ErrorCode;
use thiserror::Error;

pub use config::MasterConfig;
pub use engine::Engine;
pub use scheduler::Scheduler;
pub use store::MasterStore;

/// Result type alias for master operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the master engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Model-level failure (forbidden transition, validation).
    #[error(transparent)]
    Model(#[from] dedalus_core::Error),

    /// The document store failed.
    #[error(transparent)]
    Store(#[from] dedalus_store::Error),

    /// No such graph (or graph revision).
    #[error("graph '{name}'{} not found", revision.map(|r| format!(" revision {r}")).unwrap_or_default())]
    GraphNotFound {
        /// Graph name.
        name: String,
        /// Specific revision asked for, if any.
        revision: Option<u64>,
    },

    /// No such graph instance.
    #[error("graph instance '{instance_id}' not found")]
    InstanceNotFound {
        /// The unknown id.
        instance_id: String,
    },

    /// A malformed request (empty name, bad path segment).
    #[error("{message}")]
    InvalidRequest {
        /// What was wrong.
        message: String,
    },

    /// An RPC against a worker failed.
    #[error("worker '{host}' rpc failed: {message}")]
    WorkerRpc {
        /// Worker host the call targeted.
        host: String,
        /// What went wrong.
        message: String,
    },

    /// Persisted execution state contradicts the graph structure.
    #[error("inconsistent instance state: {message}")]
    Inconsistent {
        /// Description of the contradiction.
        message: String,
    },

    /// The instance has tasks but none is ready to run.
    #[error("graph instance '{instance_id}' has no tasks without unsatisfied dependencies")]
    UnsatisfiableGraph {
        /// The instance in question.
        instance_id: String,
    },
}

impl Error {
    /// Map onto the API error taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Model(_)
            | Self::GraphNotFound { .. }
            | Self::InstanceNotFound { .. }
            | Self::InvalidRequest { .. }
            | Self::UnsatisfiableGraph { .. } => ErrorCode::AppError,
            Self::Store(_) | Self::Inconsistent { .. } => ErrorCode::BackendError,
            Self::WorkerRpc { .. } => ErrorCode::BackendNetworkError,
        }
    }

    pub(crate) fn rpc(host: impl Into<String>, message: impl ToString) -> Self {
        Self::WorkerRpc {
            host: host.into(),
            message: message.to_string(),
        }
    }
}
