//! Graph structures and per-instance execution bookkeeping.
//!
//! A [`GraphStruct`] is immutable once a revision is assigned; launching one
//! snapshots it into a [`GraphInstanceInfo`] whose execution stats are the
//! single mutable record the supervisor persists as the DAG advances.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{InstanceState, StateMachine, TaskState};
use crate::task::TaskStruct;
use crate::{Error, Result};

/// One task inside a graph: what to run and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedTask {
    /// Name, unique within the graph.
    pub task_name: String,
    /// Resources plus executor descriptor.
    pub task_struct: TaskStruct,
    /// Cluster labels; the task runs independently on every host of every
    /// listed cluster.
    pub hosts: Vec<String>,
}

/// A named, revisioned DAG of tasks pinned to host clusters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStruct {
    /// Graph name; revisions of one name form a history.
    #[serde(default)]
    pub graph_name: String,
    /// Monotonically increasing per name, assigned by the master.
    #[serde(default)]
    pub revision: u64,
    /// Cluster label to ordered host addresses.
    #[serde(default)]
    pub clusters: BTreeMap<String, Vec<String>>,
    /// The tasks, in declared order.
    #[serde(default)]
    pub tasks: Vec<ExtendedTask>,
    /// `task_name` to the names it depends on.
    #[serde(default)]
    pub deps: BTreeMap<String, Vec<String>>,
}

impl GraphStruct {
    /// Validate the structure: unique task names, known clusters, non-empty
    /// host lists, and a dependency mapping that references only known tasks
    /// and contains no cycle.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn verify(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut dups = BTreeSet::new();
        for task in &self.tasks {
            if !seen.insert(task.task_name.as_str()) {
                dups.insert(task.task_name.clone());
            }
        }
        if !dups.is_empty() {
            return Err(Error::DuplicateTasks {
                names: dups.into_iter().collect(),
            });
        }

        let mut unknown_clusters = BTreeSet::new();
        for task in &self.tasks {
            if task.hosts.is_empty() {
                return Err(Error::NoHosts {
                    task: task.task_name.clone(),
                });
            }
            for cluster in &task.hosts {
                if !self.clusters.contains_key(cluster) {
                    unknown_clusters.insert(cluster.clone());
                }
            }
        }
        if !unknown_clusters.is_empty() {
            return Err(Error::UnknownClusters {
                clusters: unknown_clusters.into_iter().collect(),
            });
        }

        let graph = dedalus_graph::DepGraph::build(
            self.tasks.iter().map(|t| t.task_name.as_str()),
            &self.deps,
        )?;
        graph.ensure_acyclic()?;
        Ok(())
    }

    /// The hosts a task runs on: every host of every listed cluster, in
    /// declared order, first occurrence wins.
    #[must_use]
    pub fn hosts_of(&self, task: &ExtendedTask) -> Vec<String> {
        let mut hosts = Vec::new();
        let mut seen = HashSet::new();
        for cluster in &task.hosts {
            if let Some(cluster_hosts) = self.clusters.get(cluster) {
                for host in cluster_hosts {
                    if seen.insert(host.as_str()) {
                        hosts.push(host.clone());
                    }
                }
            }
        }
        hosts
    }
}

/// Execution record of one task on one specific host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOnHostExecutionInfo {
    /// Worker-assigned id; `None` until the task exists on the worker.
    pub task_id: Option<String>,
    /// Last state adopted from the worker.
    #[serde(default)]
    pub state: TaskState,
}

/// Execution record of one task across all its hosts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionInfo {
    /// Host address to its execution record.
    #[serde(default)]
    pub per_host_info: BTreeMap<String, TaskOnHostExecutionInfo>,
    /// Precomputed reverse index of `deps`: tasks that depend on this one.
    #[serde(default)]
    pub dependents: Vec<String>,
}

impl TaskExecutionInfo {
    /// The single state representing this task across its hosts.
    ///
    /// Only hosts that already have a worker-side task count; before any is
    /// created the aggregate is idle.
    #[must_use]
    pub fn aggregated_state(&self) -> TaskState {
        TaskState::aggregate(
            self.per_host_info
                .values()
                .filter(|info| info.task_id.is_some())
                .map(|info| info.state),
        )
    }
}

/// Mutable execution stats of one graph instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceExecStats {
    /// Instance state machine.
    #[serde(default)]
    pub state: InstanceState,
    /// Set at the idle to running transition.
    pub start_time: Option<DateTime<Utc>>,
    /// Set when execution finishes, fails or is stopped.
    pub finish_time: Option<DateTime<Utc>>,
    /// Why the instance failed, if it did.
    pub fail_msg: Option<String>,
    /// `task_name` to its execution record; populated exactly once, at the
    /// idle to running transition.
    #[serde(default)]
    pub per_task_execution_info: BTreeMap<String, TaskExecutionInfo>,
}

impl InstanceExecStats {
    /// Move idle to running and stamp the start time.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::ForbiddenTransition`] if the instance is not idle.
    pub fn start_execution(&mut self) -> Result<()> {
        self.state.change_state(InstanceState::Running, false)?;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    /// Stamp the finish time and move to the matching terminal state:
    /// finished, or stopped when user-initiated, or failed.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::ForbiddenTransition`] if the instance is already
    /// terminal.
    pub fn finish_execution(
        &mut self,
        is_failed: bool,
        is_initiated_by_user: bool,
        fail_msg: Option<String>,
    ) -> Result<()> {
        self.finish_time = Some(Utc::now());
        self.fail_msg = fail_msg;
        let target = if !is_failed && !is_initiated_by_user {
            InstanceState::Finished
        } else if is_initiated_by_user {
            InstanceState::Stopped
        } else {
            InstanceState::Failed
        };
        self.state.change_state(target, false)?;
        Ok(())
    }
}

/// One execution of a specific graph revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphInstanceInfo {
    /// Unique instance id.
    pub instance_id: String,
    /// Frozen copy of the graph at launch time.
    pub structure: GraphStruct,
    /// Execution stats, mutated only by the owning supervisor.
    #[serde(default)]
    pub exec_stats: InstanceExecStats,
}

impl GraphInstanceInfo {
    /// A freshly launched, idle instance snapshotting `structure`.
    #[must_use]
    pub fn launch(instance_id: impl Into<String>, structure: GraphStruct) -> Self {
        Self {
            instance_id: instance_id.into(),
            structure,
            exec_stats: InstanceExecStats::default(),
        }
    }

    /// Seed `per_task_execution_info` from the structure: an entry per task
    /// with one record per target host, and `dependents` computed by
    /// inverting `deps`.
    ///
    /// Idempotent per instance; existing entries are kept.
    pub fn init_per_task_execution_info(&mut self) {
        let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (task, deps) in &self.structure.deps {
            for dep in deps {
                dependents.entry(dep).or_default().insert(task);
            }
        }

        let structure = &self.structure;
        let stats = &mut self.exec_stats;
        for task in &structure.tasks {
            let entry = stats
                .per_task_execution_info
                .entry(task.task_name.clone())
                .or_default();
            if entry.dependents.is_empty() {
                entry.dependents = dependents
                    .get(task.task_name.as_str())
                    .map(|names| names.iter().map(ToString::to_string).collect())
                    .unwrap_or_default();
            }
            for host in structure.hosts_of(task) {
                entry.per_host_info.entry(host).or_default();
            }
        }
    }
}
