//! Per-task supervisor: prepares resources, runs the executor, captures logs.

use std::sync::Arc;

use dedalus_core::{StateMachine, TaskState};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executors::{Executor, OutputEvent};
use crate::resources::Resource;
use crate::store::WorkerStore;
use crate::{Error, Result};

/// Supervisor for one task on this worker.
///
/// Owns the task's resources and executor; a spawned supervision task drives
/// the state machine `preparing -> prepared -> running -> terminal`,
/// persisting every step. `set_state` is the only external entry point.
pub struct TaskExecution {
    task_id: String,
    store: WorkerStore,
    resources: Vec<Box<dyn Resource>>,
    executor: Mutex<Box<dyn Executor>>,
    user_stop: CancellationToken,
}

impl TaskExecution {
    /// Build the supervisor from the task's persisted structure.
    pub fn new(
        task_id: impl Into<String>,
        store: WorkerStore,
        resources: Vec<Box<dyn Resource>>,
        executor: Box<dyn Executor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            task_id: task_id.into(),
            store,
            resources,
            executor: Mutex::new(executor),
            user_stop: CancellationToken::new(),
        })
    }

    /// Validate and apply a state-change request, returning the prior state.
    ///
    /// `idle -> preparing` spawns the supervision task; a request for
    /// `stopped` flags the supervisor and kills the executor, and the
    /// supervisor persists the terminal state.
    ///
    /// # Errors
    ///
    /// Forbidden transitions and store failures.
    pub async fn set_state(self: &Arc<Self>, target: TaskState) -> Result<TaskState> {
        let mut state = self.store.read_task_state(&self.task_id)?;
        let prior = state;
        state.change_state(target, false).map_err(dedalus_core::Error::from)?;
        if prior != target {
            if prior == TaskState::Idle && target == TaskState::Preparing {
                let supervisor = Arc::clone(self);
                tokio::spawn(async move { supervisor.supervise().await });
            } else if target == TaskState::Stopped {
                self.user_stop.cancel();
                self.executor.lock().await.kill();
            }
        }
        Ok(prior)
    }

    /// Whether the user asked this task to stop.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.user_stop.is_cancelled()
    }

    async fn supervise(self: Arc<Self>) {
        debug!(task = %self.task_id, "supervisor started");
        let result = async {
            if self.prepare().await? && !self.user_stop.is_cancelled() {
                self.execute().await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        if let Err(err) = result {
            error!(task = %self.task_id, error = %err, "supervisor failed");
        }
        debug!(task = %self.task_id, "supervisor finished");
    }

    /// Ensure every resource, moving `idle -> preparing -> (prepared |
    /// prepfailed | stopped)`. Returns whether preparation succeeded.
    async fn prepare(&self) -> Result<bool> {
        let mut info = self.store.read_task_info(&self.task_id)?;
        info.exec_stats.start_preparation()?;
        self.store.write_task_info(&info)?;

        let mut prep_error: Option<Error> = None;
        for resource in &self.resources {
            if self.user_stop.is_cancelled() {
                break;
            }
            if let Err(err) = resource.ensure().await {
                warn!(
                    task = %self.task_id,
                    resource = resource.name(),
                    error = %err,
                    "resource preparation failed"
                );
                prep_error = Some(err);
                break;
            }
        }

        let mut info = self.store.read_task_info(&self.task_id)?;
        let success = prep_error.is_none();
        info.exec_stats.finish_preparation(
            success,
            prep_error.map(|err| err.to_string()),
            self.user_stop.is_cancelled(),
        )?;
        self.store.write_task_info(&info)?;
        Ok(success && !self.user_stop.is_cancelled())
    }

    /// Run the executor, moving `prepared -> running -> (finished | failed |
    /// stopped)` and appending output to `stdout.log` / `stderr.log`.
    async fn execute(&self) -> Result<()> {
        let (mut events, work_dir) = {
            let mut executor = self.executor.lock().await;
            let started = executor.start().await;
            match started {
                Ok(events) => (events, executor.work_dir().to_path_buf()),
                Err(err) => {
                    // The executor never came up; record a failed run.
                    warn!(task = %self.task_id, error = %err, "executor failed to start");
                    let mut info = self.store.read_task_info(&self.task_id)?;
                    info.exec_stats.start_execution()?;
                    info.exec_stats
                        .finish_execution(None, self.user_stop.is_cancelled())?;
                    self.store.write_task_info(&info)?;
                    return Ok(());
                }
            }
        };

        let mut info = self.store.read_task_info(&self.task_id)?;
        info.exec_stats.start_execution()?;
        self.store.write_task_info(&info)?;

        let open = |name: &'static str| {
            let path = work_dir.join(name);
            async move {
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(|source| Error::io(format!("opening {}", path.display()), source))
            }
        };
        let mut stdout_log = open("stdout.log").await?;
        let mut stderr_log = open("stderr.log").await?;

        let mut retcode = None;
        while let Some(event) = events.recv().await {
            match event {
                OutputEvent::Stdout(line) => {
                    append_line(&mut stdout_log, &line).await?;
                }
                OutputEvent::Stderr(line) => {
                    append_line(&mut stderr_log, &line).await?;
                }
                OutputEvent::Ended(code) => {
                    retcode = code;
                    break;
                }
            }
        }
        info!(task = %self.task_id, retcode = ?retcode, "execution ended");

        let mut info = self.store.read_task_info(&self.task_id)?;
        info.exec_stats
            .finish_execution(retcode, self.user_stop.is_cancelled())?;
        self.store.write_task_info(&info)?;
        Ok(())
    }
}

async fn append_line(file: &mut tokio::fs::File, line: &str) -> Result<()> {
    file.write_all(line.as_bytes())
        .await
        .map_err(|source| Error::io("appending log line", source))?;
    file.write_all(b"\n")
        .await
        .map_err(|source| Error::io("appending log line", source))?;
    Ok(())
}
