//! Per-task progress tracker on the master.

use dedalus_core::{
    GraphInstanceInfo, StateMachine, TaskOnHostExecutionInfo, TaskState, TaskStruct,
};
use tracing::{debug, warn};

use crate::store::MasterStore;
use crate::worker_client::WorkerConnector;
use crate::{Error, Result};

/// Drives one task of a running instance across all its target hosts.
///
/// The mentor owns no state of its own beyond the task's static shape; all
/// progress lives in the instance document so every step survives a crash.
pub struct TaskMentor {
    pub(crate) task_name: String,
    pub(crate) task_struct: TaskStruct,
    /// Target hosts in declared order (clusters in listed order, hosts in
    /// cluster order).
    pub(crate) hosts: Vec<String>,
    /// Arena indices of the tasks this one depends on.
    pub(crate) deps: Vec<usize>,
    /// Arena indices of the tasks depending on this one.
    pub(crate) dependents: Vec<usize>,
}

impl TaskMentor {
    /// The aggregated state of this task across its hosts.
    #[must_use]
    pub fn aggregated_state(&self, instance: &GraphInstanceInfo) -> TaskState {
        instance
            .exec_stats
            .per_task_execution_info
            .get(&self.task_name)
            .map_or(TaskState::Idle, |info| info.aggregated_state())
    }

    /// Whether the task is terminal on every counted host.
    #[must_use]
    pub fn is_done(&self, instance: &GraphInstanceInfo) -> bool {
        self.aggregated_state(instance).is_terminal()
    }

    /// Whether the task counts as failed.
    #[must_use]
    pub fn is_failed(&self, instance: &GraphInstanceInfo) -> bool {
        self.aggregated_state(instance).is_failed()
    }

    /// True iff every dependency is terminal and non-failed.
    #[must_use]
    pub fn all_deps_ready(&self, arena: &[TaskMentor], instance: &GraphInstanceInfo) -> bool {
        self.deps.iter().all(|&dep| {
            let state = arena[dep].aggregated_state(instance);
            state.is_terminal() && !state.is_failed()
        })
    }

    /// Arena indices of dependents whose dependencies are now all satisfied.
    #[must_use]
    pub fn ready_dependents(
        &self,
        arena: &[TaskMentor],
        instance: &GraphInstanceInfo,
    ) -> Vec<usize> {
        self.dependents
            .iter()
            .copied()
            .filter(|&idx| arena[idx].all_deps_ready(arena, instance))
            .collect()
    }

    /// Drive each host's sub-task through one forward step: create it on the
    /// worker, start it, or poll its state. Every adoption persists the whole
    /// instance document.
    ///
    /// Worker RPC failures are logged and retried next tick; a host that just
    /// became failed ends the host loop for this tick.
    ///
    /// # Errors
    ///
    /// Store failures and inconsistent execution records.
    pub async fn tick(
        &self,
        instance: &mut GraphInstanceInfo,
        store: &MasterStore,
        workers: &dyn WorkerConnector,
    ) -> Result<()> {
        for host in &self.hosts {
            match self.tick_host(host, instance, store, workers).await {
                Ok(became_failed) => {
                    if became_failed {
                        break;
                    }
                }
                Err(Error::WorkerRpc { host, message }) => {
                    warn!(
                        task = %self.task_name,
                        worker = %host,
                        error = %message,
                        "worker rpc failed, retrying next tick"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn tick_host(
        &self,
        host: &str,
        instance: &mut GraphInstanceInfo,
        store: &MasterStore,
        workers: &dyn WorkerConnector,
    ) -> Result<bool> {
        let client = workers.client_for(host);

        if self.host_entry(instance, host)?.task_id.is_none() {
            let task_id = client.create_task(&self.task_struct).await?;
            debug!(task = %self.task_name, worker = %host, remote_id = %task_id, "created task");
            let entry = self.host_entry(instance, host)?;
            entry.task_id = Some(task_id);
            entry.state.force_state(TaskState::Idle);
            store.write_instance(instance)?;
        }

        let entry = self.host_entry(instance, host)?;
        let state = entry.state;
        let task_id = entry.task_id.clone().ok_or_else(|| Error::Inconsistent {
            message: format!(
                "task '{}' on '{host}' lost its id after creation",
                self.task_name
            ),
        })?;

        if state == TaskState::Idle {
            let new_state = client.start_task(&task_id).await?;
            debug!(task = %self.task_name, worker = %host, state = %new_state, "started task");
            self.host_entry(instance, host)?.state.force_state(new_state);
            store.write_instance(instance)?;
        }

        let state = self.host_entry(instance, host)?.state;
        if !state.is_terminal() {
            let remote = client.get_task_state(&task_id).await?;
            if remote != state {
                debug!(
                    task = %self.task_name,
                    worker = %host,
                    from = %state,
                    to = %remote,
                    "adopted task state"
                );
                self.host_entry(instance, host)?.state.force_state(remote);
                store.write_instance(instance)?;
            }
            return Ok(remote.is_failed());
        }
        Ok(false)
    }

    fn host_entry<'a>(
        &self,
        instance: &'a mut GraphInstanceInfo,
        host: &str,
    ) -> Result<&'a mut TaskOnHostExecutionInfo> {
        instance
            .exec_stats
            .per_task_execution_info
            .get_mut(&self.task_name)
            .and_then(|info| info.per_host_info.get_mut(host))
            .ok_or_else(|| Error::Inconsistent {
                message: format!(
                    "no execution entry for task '{}' on host '{host}'",
                    self.task_name
                ),
            })
    }
}
