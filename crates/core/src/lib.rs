//! Core types for the dedalus task-graph execution system.
//!
//! This crate holds everything the master, the worker and the client share:
//! the graph and task data model, the two state machines and their
//! aggregation rules, the wire envelope with its error taxonomy, plugin
//! descriptors and the schedule model. It has no I/O of its own.

pub mod api;
pub mod graph;
pub mod plugin;
pub mod schedule;
pub mod state;
pub mod task;

use thiserror::Error;

pub use api::{ApiError, ApiResponse, ErrorCode, LogStream};
pub use graph::{
    ExtendedTask, GraphInstanceInfo, GraphStruct, InstanceExecStats, TaskExecutionInfo,
    TaskOnHostExecutionInfo,
};
pub use plugin::{ExecutorSpec, ResourceSpec};
pub use schedule::ScheduledGraph;
pub use state::{ForbiddenTransition, InstanceState, StateMachine, TaskState};
pub use task::{TaskExecStats, TaskInfo, TaskStruct};

/// Result type alias for model-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while validating or evolving the shared data model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A state change that the transition table does not allow.
    #[error(transparent)]
    ForbiddenTransition(#[from] ForbiddenTransition),

    /// Several tasks in one graph share a name.
    #[error("duplicate tasks found in graph: {}", names.join(", "))]
    DuplicateTasks {
        /// The duplicated task names.
        names: Vec<String>,
    },

    /// A task references a cluster label the graph does not define.
    #[error("unknown clusters mentioned: {}", clusters.join(", "))]
    UnknownClusters {
        /// The unresolved cluster labels.
        clusters: Vec<String>,
    },

    /// A task lists no clusters to run on.
    #[error("task '{task}' has no hosts to run on")]
    NoHosts {
        /// The offending task name.
        task: String,
    },

    /// The dependency mapping is malformed (unknown names or a cycle).
    #[error(transparent)]
    Dependencies(#[from] dedalus_graph::Error),

    /// A schedule rule that does not parse as a cron expression.
    #[error("invalid schedule rule '{rule}': {message}")]
    InvalidSchedule {
        /// The rejected rule.
        rule: String,
        /// Parser diagnostics.
        message: String,
    },
}
