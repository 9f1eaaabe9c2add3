//! Dependency DAG construction and validation for dedalus graphs.
//!
//! A dedalus graph names its tasks and lists, per task, the tasks it depends
//! on. This crate turns that adjacency mapping into a petgraph [`DepGraph`]
//! so the rest of the system can validate it (unknown references, cycles) and
//! query it (dependents, roots) without re-deriving graph algorithms.
//!
//! # Key Types
//!
//! - [`DepGraph`]: the directed dependency graph over task names
//! - [`Error`]: validation failures (missing dependencies, cycles)

mod error;
mod graph;

pub use error::{Error, Result};
pub use graph::DepGraph;
