//! Error types for dependency graph operations.

use thiserror::Error;

/// Result type for dependency graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or validating a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A task names a dependency that is not part of the graph.
    #[error("unknown tasks referenced in deps: {}", unknown.join(", "))]
    UnknownDependencies {
        /// Names that appear in the dependency mapping but not in the task set.
        unknown: Vec<String>,
    },

    /// The dependency mapping contains a cycle.
    #[error("loop in task dependencies: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Task names forming the cycle, in traversal order.
        cycle: Vec<String>,
    },
}
