//! Per-instance DAG walker.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dedalus_core::{GraphInstanceInfo, StateMachine};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TaskMentor;
use crate::store::MasterStore;
use crate::worker_client::WorkerConnector;
use crate::{Error, Result};

/// Walks one running instance's DAG, advancing ready tasks one tick at a
/// time and committing progress after every state change.
pub struct GraphMentor {
    instance: GraphInstanceInfo,
    store: MasterStore,
    workers: Arc<dyn WorkerConnector>,
    shutdown: CancellationToken,
    user_stop: CancellationToken,
    mentors: Vec<TaskMentor>,
    /// Mentors whose dependencies are satisfied and who are not yet done.
    working: BTreeSet<usize>,
}

impl GraphMentor {
    /// Build the mentor arena for an instance whose
    /// `per_task_execution_info` is already initialized.
    ///
    /// # Errors
    ///
    /// [`Error::UnsatisfiableGraph`] if the graph has tasks but none is
    /// immediately ready (only possible with inconsistent persisted state),
    /// [`Error::Inconsistent`] if structure and execution records disagree.
    pub fn new(
        instance: GraphInstanceInfo,
        store: MasterStore,
        workers: Arc<dyn WorkerConnector>,
        shutdown: CancellationToken,
        user_stop: CancellationToken,
    ) -> Result<Self> {
        let name_to_idx: HashMap<&str, usize> = instance
            .structure
            .tasks
            .iter()
            .enumerate()
            .map(|(idx, task)| (task.task_name.as_str(), idx))
            .collect();

        let resolve = |names: &[String]| -> Result<Vec<usize>> {
            names
                .iter()
                .map(|name| {
                    name_to_idx
                        .get(name.as_str())
                        .copied()
                        .ok_or_else(|| Error::Inconsistent {
                            message: format!("unknown task '{name}' referenced in instance"),
                        })
                })
                .collect()
        };

        let mut mentors = Vec::with_capacity(instance.structure.tasks.len());
        for task in &instance.structure.tasks {
            let deps = instance
                .structure
                .deps
                .get(&task.task_name)
                .map(|names| resolve(names))
                .transpose()?
                .unwrap_or_default();
            let dependents = instance
                .exec_stats
                .per_task_execution_info
                .get(&task.task_name)
                .map(|info| resolve(&info.dependents))
                .transpose()?
                .unwrap_or_default();
            mentors.push(TaskMentor {
                task_name: task.task_name.clone(),
                task_struct: task.task_struct.clone(),
                hosts: instance.structure.hosts_of(task),
                deps,
                dependents,
            });
        }

        let working: BTreeSet<usize> = (0..mentors.len())
            .filter(|&idx| {
                mentors[idx].all_deps_ready(&mentors, &instance)
                    && !mentors[idx].is_done(&instance)
            })
            .collect();
        if working.is_empty() && !mentors.is_empty() {
            return Err(Error::UnsatisfiableGraph {
                instance_id: instance.instance_id.clone(),
            });
        }

        debug!(
            instance = %instance.instance_id,
            tasks = mentors.len(),
            ready = working.len(),
            "graph mentor constructed"
        );
        Ok(Self {
            instance,
            store,
            workers,
            shutdown,
            user_stop,
            mentors,
            working,
        })
    }

    /// The instance is done once no mentor is left working.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.working.is_empty()
    }

    /// Whether any task ever reported failure during this run.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.mentors
            .iter()
            .any(|mentor| mentor.is_failed(&self.instance))
    }

    /// The owned instance document, as last committed.
    #[must_use]
    pub fn instance(&self) -> &GraphInstanceInfo {
        &self.instance
    }

    /// Advance the instance by one tick: observe stop flags, tick every
    /// working mentor, fail fast on the first failing task, rotate the
    /// working set and finish the instance once it drains.
    ///
    /// # Errors
    ///
    /// Store failures and inconsistent state; worker RPC errors are handled
    /// inside the task mentors.
    pub async fn tick(&mut self) -> Result<()> {
        if self.shutdown.is_cancelled() || self.user_stop.is_cancelled() {
            return self.stop_execution().await;
        }

        let snapshot: Vec<usize> = self.working.iter().copied().collect();
        let mut done_now = Vec::new();
        let mut newly_ready = BTreeSet::new();
        for idx in snapshot {
            let mentor = &self.mentors[idx];
            mentor
                .tick(&mut self.instance, &self.store, self.workers.as_ref())
                .await?;
            if self.mentors[idx].is_done(&self.instance) {
                done_now.push(idx);
                if self.mentors[idx].is_failed(&self.instance) {
                    info!(
                        instance = %self.instance.instance_id,
                        task = %self.mentors[idx].task_name,
                        "task failed, stopping instance"
                    );
                    return self.stop_execution().await;
                }
                newly_ready
                    .extend(self.mentors[idx].ready_dependents(&self.mentors, &self.instance));
            }
        }

        for idx in newly_ready {
            self.working.insert(idx);
        }
        for idx in done_now {
            self.working.remove(&idx);
        }

        if self.working.is_empty() {
            info!(instance = %self.instance.instance_id, "all tasks finished");
            self.instance.exec_stats.finish_execution(false, false, None)?;
            self.persist()?;
        }
        Ok(())
    }

    /// Wind the instance down.
    ///
    /// Under process shutdown nothing is persisted, so the instance stays
    /// `running` in the store and resumes at next boot. Otherwise the final
    /// state (stopped for a user stop, failed for a failing task) is
    /// committed, and a user stop is propagated to in-flight worker tasks.
    async fn stop_execution(&mut self) -> Result<()> {
        if !self.shutdown.is_cancelled() {
            let by_user = self.user_stop.is_cancelled();
            if by_user {
                self.stop_inflight_tasks().await;
            }
            let is_failed = self.is_failed();
            let fail_msg = (is_failed && !by_user).then(|| self.failure_message());
            self.instance
                .exec_stats
                .finish_execution(is_failed, by_user, fail_msg)?;
            self.persist()?;
            info!(
                instance = %self.instance.instance_id,
                state = %self.instance.exec_stats.state,
                "instance execution stopped"
            );
        }
        self.working.clear();
        Ok(())
    }

    /// Ask workers to stop every in-flight task of this instance, adopting
    /// whatever state they report. Best effort: an unreachable worker only
    /// logs.
    async fn stop_inflight_tasks(&mut self) {
        for idx in self.working.iter().copied().collect::<Vec<_>>() {
            let mentor = &self.mentors[idx];
            for host in mentor.hosts.clone() {
                let Some(info) = self
                    .instance
                    .exec_stats
                    .per_task_execution_info
                    .get_mut(&mentor.task_name)
                else {
                    continue;
                };
                let Some(entry) = info.per_host_info.get_mut(&host) else {
                    continue;
                };
                let Some(task_id) = entry.task_id.clone() else {
                    continue;
                };
                if entry.state.is_terminal() {
                    continue;
                }
                match self.workers.client_for(&host).stop_task(&task_id).await {
                    Ok(new_state) => {
                        entry.state.force_state(new_state);
                    }
                    Err(err) => {
                        warn!(
                            task = %mentor.task_name,
                            worker = %host,
                            error = %err,
                            "failed to stop task on worker"
                        );
                    }
                }
            }
        }
    }

    fn failure_message(&self) -> String {
        for mentor in &self.mentors {
            let state = mentor.aggregated_state(&self.instance);
            if state.is_failed() {
                return format!("task '{}' ended as '{state}'", mentor.task_name);
            }
        }
        "a task failed".to_string()
    }

    fn persist(&self) -> Result<()> {
        self.store.write_instance(&self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedalus_core::{TaskOnHostExecutionInfo, TaskState};

    fn mentor(name: &str, deps: Vec<usize>, dependents: Vec<usize>) -> TaskMentor {
        TaskMentor {
            task_name: name.to_string(),
            task_struct: dedalus_core::TaskStruct::default(),
            hosts: vec!["h1".to_string()],
            deps,
            dependents,
        }
    }

    fn instance_with_states(states: &[(&str, Option<TaskState>)]) -> GraphInstanceInfo {
        let mut instance = GraphInstanceInfo::launch("i1", dedalus_core::GraphStruct::default());
        for (name, state) in states {
            let mut info = dedalus_core::TaskExecutionInfo::default();
            info.per_host_info.insert(
                "h1".to_string(),
                match state {
                    Some(state) => TaskOnHostExecutionInfo {
                        task_id: Some(format!("remote-{name}")),
                        state: *state,
                    },
                    None => TaskOnHostExecutionInfo::default(),
                },
            );
            instance
                .exec_stats
                .per_task_execution_info
                .insert((*name).to_string(), info);
        }
        instance
    }

    #[test]
    fn test_all_deps_ready_requires_terminal_and_non_failed() {
        let arena = vec![mentor("a", vec![], vec![1]), mentor("b", vec![0], vec![])];

        let instance = instance_with_states(&[("a", Some(TaskState::Finished)), ("b", None)]);
        assert!(arena[1].all_deps_ready(&arena, &instance));

        let instance = instance_with_states(&[("a", Some(TaskState::Running)), ("b", None)]);
        assert!(!arena[1].all_deps_ready(&arena, &instance));

        let instance = instance_with_states(&[("a", Some(TaskState::Failed)), ("b", None)]);
        assert!(!arena[1].all_deps_ready(&arena, &instance));
    }

    #[test]
    fn test_ready_dependents() {
        // c depends on both a and b.
        let arena = vec![
            mentor("a", vec![], vec![2]),
            mentor("b", vec![], vec![2]),
            mentor("c", vec![0, 1], vec![]),
        ];

        let instance = instance_with_states(&[
            ("a", Some(TaskState::Finished)),
            ("b", Some(TaskState::Running)),
            ("c", None),
        ]);
        assert!(arena[0].ready_dependents(&arena, &instance).is_empty());

        let instance = instance_with_states(&[
            ("a", Some(TaskState::Finished)),
            ("b", Some(TaskState::Finished)),
            ("c", None),
        ]);
        assert_eq!(arena[0].ready_dependents(&arena, &instance), vec![2]);
    }
}
