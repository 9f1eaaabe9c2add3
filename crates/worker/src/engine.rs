//! Worker engine: registry of active task supervisors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dedalus_core::{LogStream, StateMachine, TaskInfo, TaskState, TaskStruct};
use dedalus_store::Store;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::WorkerConfig;
use crate::execution::TaskExecution;
use crate::executors::{ExecutionContext, ExecutorRegistry};
use crate::resources::ResourceRegistry;
use crate::store::WorkerStore;
use crate::{Error, Result};

/// The worker's task engine.
///
/// Creates idle tasks, spins up a [`TaskExecution`] supervisor when a task is
/// started, and routes state-change requests to the right supervisor.
pub struct WorkerEngine {
    store: WorkerStore,
    executors: ExecutorRegistry,
    resources: ResourceRegistry,
    execution_data_root: PathBuf,
    tasks: Mutex<HashMap<String, Arc<TaskExecution>>>,
}

impl WorkerEngine {
    /// Build the engine from config with the built-in plugin registries.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn new(config: &WorkerConfig, store: &Store) -> Result<Self> {
        Ok(Self {
            store: WorkerStore::new(store)?,
            executors: ExecutorRegistry::builtin(),
            resources: ResourceRegistry::builtin(),
            execution_data_root: config.execution_data_root.clone(),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Persist a fresh idle task for `structure` and return it.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn create_idle_task(&self, structure: TaskStruct) -> Result<TaskInfo> {
        let task_id = Uuid::new_v4().simple().to_string();
        let info = TaskInfo::idle(task_id, structure);
        self.store.write_task_info(&info)?;
        info!(task = %info.task_id, executor = %info.structure.executor.name, "created task");
        Ok(info)
    }

    /// Validate and apply a state-change request, returning the prior state.
    ///
    /// A task that is not under supervision yet gets its transition checked
    /// against the store; `preparing` constructs the supervisor (resolving
    /// plugins), other targets are persisted directly.
    ///
    /// # Errors
    ///
    /// Unknown tasks, forbidden transitions, plugin resolution failures and
    /// store failures.
    pub async fn set_task_state(&self, task_id: &str, target: TaskState) -> Result<TaskState> {
        let mut tasks = self.tasks.lock().await;
        if let Some(execution) = tasks.get(task_id) {
            return execution.set_state(target).await;
        }

        let mut info = self.store.read_task_info(task_id)?;
        let prior = info.exec_stats.state;
        info.exec_stats
            .state
            .change_state(target, false)
            .map_err(dedalus_core::Error::from)?;
        if target != TaskState::Preparing {
            if prior != target {
                self.store.write_task_info(&info)?;
            }
            return Ok(prior);
        }

        let execution = self.construct_execution(task_id)?;
        tasks.insert(task_id.to_string(), Arc::clone(&execution));
        execution.set_state(target).await
    }

    /// Read a task document.
    ///
    /// # Errors
    ///
    /// [`Error::TaskNotFound`] for an unknown id.
    pub fn task_info(&self, task_id: &str) -> Result<TaskInfo> {
        self.store.read_task_info(task_id)
    }

    /// Read a task's state.
    ///
    /// # Errors
    ///
    /// [`Error::TaskNotFound`] for an unknown id.
    pub fn task_state(&self, task_id: &str) -> Result<TaskState> {
        self.store.read_task_state(task_id)
    }

    /// List known tasks.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn list_tasks(&self, with_info: bool) -> Result<Vec<(String, Option<TaskInfo>)>> {
        self.store.list_tasks(with_info)
    }

    /// Read a captured log of a task.
    ///
    /// # Errors
    ///
    /// [`Error::TaskNotFound`] for an unknown id; an empty string for a task
    /// that has not produced the log yet.
    pub async fn task_log(&self, task_id: &str, stream: LogStream) -> Result<String> {
        // Existence check keeps unknown ids a 404 rather than an empty log.
        self.store.read_task_info(task_id)?;
        let path = self
            .execution_data_root
            .join(task_id)
            .join(stream.file_name());
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(Error::io(format!("reading {}", path.display()), source)),
        }
    }

    fn construct_execution(&self, task_id: &str) -> Result<Arc<TaskExecution>> {
        let info = self.store.read_task_info(task_id)?;
        let resources = info
            .structure
            .resources
            .iter()
            .map(|spec| self.resources.construct(spec))
            .collect::<Result<Vec<_>>>()?;
        let context = ExecutionContext {
            execution_data_root: self.execution_data_root.clone(),
            execution_id: task_id.to_string(),
        };
        let executor = self.executors.construct(&context, &info.structure.executor)?;
        Ok(TaskExecution::new(
            task_id,
            self.store.clone(),
            resources,
            executor,
        ))
    }
}
