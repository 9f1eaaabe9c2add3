//! Worker-side task model and its execution stats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::plugin::{ExecutorSpec, ResourceSpec};
use crate::state::{StateMachine, TaskState};

/// What a task needs (resources) and how it runs (executor).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStruct {
    /// Resources ensured before the executor starts.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Executor descriptor.
    #[serde(default)]
    pub executor: ExecutorSpec,
}

/// Execution stats of one task on the worker, persisted on every change.
///
/// Timestamps are monotone: `prep_start <= prep_finish <= start <= finish`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecStats {
    /// Task state machine.
    #[serde(default)]
    pub state: TaskState,
    /// Executor exit code, once it exited.
    pub retcode: Option<i32>,
    /// Set when resource preparation starts.
    pub prep_start_time: Option<DateTime<Utc>>,
    /// Set when resource preparation finishes (either way).
    pub prep_finish_time: Option<DateTime<Utc>>,
    /// Outcome of preparation, usually an error description.
    pub prep_msg: Option<String>,
    /// Set when the executor starts.
    pub start_time: Option<DateTime<Utc>>,
    /// Set when the executor exits.
    pub finish_time: Option<DateTime<Utc>>,
}

impl TaskExecStats {
    /// Move idle to preparing and stamp the prep start time.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::ForbiddenTransition`] if the task is not idle.
    pub fn start_preparation(&mut self) -> Result<()> {
        self.state.change_state(TaskState::Preparing, false)?;
        self.prep_start_time = Some(Utc::now());
        Ok(())
    }

    /// Record the preparation outcome: prepared, prepfailed, or stopped when
    /// the user interrupted it.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::ForbiddenTransition`] if the task is not preparing.
    pub fn finish_preparation(
        &mut self,
        success: bool,
        prep_msg: Option<String>,
        is_initiated_by_user: bool,
    ) -> Result<()> {
        let target = if is_initiated_by_user {
            TaskState::Stopped
        } else if success {
            TaskState::Prepared
        } else {
            TaskState::PrepFailed
        };
        self.state.change_state(target, false)?;
        self.prep_msg = prep_msg;
        self.prep_finish_time = Some(Utc::now());
        Ok(())
    }

    /// Move prepared to running and stamp the start time.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::ForbiddenTransition`] if the task is not prepared.
    pub fn start_execution(&mut self) -> Result<()> {
        self.state.change_state(TaskState::Running, false)?;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    /// Record the executor outcome: finished on a zero exit code, stopped
    /// when the user interrupted, failed otherwise.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::ForbiddenTransition`] if the task is not running.
    pub fn finish_execution(
        &mut self,
        retcode: Option<i32>,
        is_initiated_by_user: bool,
    ) -> Result<()> {
        self.finish_time = Some(Utc::now());
        self.retcode = retcode;
        let target = if retcode == Some(0) && !is_initiated_by_user {
            TaskState::Finished
        } else if is_initiated_by_user {
            TaskState::Stopped
        } else {
            TaskState::Failed
        };
        self.state.change_state(target, false)?;
        Ok(())
    }
}

/// A task as the worker persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Worker-assigned opaque id.
    pub task_id: String,
    /// What to run.
    pub structure: TaskStruct,
    /// Progress record.
    #[serde(default)]
    pub exec_stats: TaskExecStats,
}

impl TaskInfo {
    /// A fresh idle task for `structure`.
    #[must_use]
    pub fn idle(task_id: impl Into<String>, structure: TaskStruct) -> Self {
        Self {
            task_id: task_id.into(),
            structure,
            exec_stats: TaskExecStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_lifecycle_keeps_timeline_monotone() {
        let mut stats = TaskExecStats::default();
        stats.start_preparation().unwrap();
        stats.finish_preparation(true, None, false).unwrap();
        stats.start_execution().unwrap();
        stats.finish_execution(Some(0), false).unwrap();

        assert_eq!(stats.state, TaskState::Finished);
        assert_eq!(stats.retcode, Some(0));
        let prep_start = stats.prep_start_time.unwrap();
        let prep_finish = stats.prep_finish_time.unwrap();
        let start = stats.start_time.unwrap();
        let finish = stats.finish_time.unwrap();
        assert!(prep_start <= prep_finish);
        assert!(prep_finish <= start);
        assert!(start <= finish);
    }

    #[test]
    fn test_failed_preparation() {
        let mut stats = TaskExecStats::default();
        stats.start_preparation().unwrap();
        stats
            .finish_preparation(false, Some("no such file".to_string()), false)
            .unwrap();
        assert_eq!(stats.state, TaskState::PrepFailed);
        assert_eq!(stats.prep_msg.as_deref(), Some("no such file"));
    }

    #[test]
    fn test_user_stop_during_preparation() {
        let mut stats = TaskExecStats::default();
        stats.start_preparation().unwrap();
        stats.finish_preparation(true, None, true).unwrap();
        assert_eq!(stats.state, TaskState::Stopped);
    }

    #[test]
    fn test_nonzero_retcode_fails() {
        let mut stats = TaskExecStats::default();
        stats.start_preparation().unwrap();
        stats.finish_preparation(true, None, false).unwrap();
        stats.start_execution().unwrap();
        stats.finish_execution(Some(1), false).unwrap();
        assert_eq!(stats.state, TaskState::Failed);
    }

    #[test]
    fn test_killed_executor_with_user_stop_is_stopped() {
        let mut stats = TaskExecStats::default();
        stats.start_preparation().unwrap();
        stats.finish_preparation(true, None, false).unwrap();
        stats.start_execution().unwrap();
        stats.finish_execution(None, true).unwrap();
        assert_eq!(stats.state, TaskState::Stopped);
        assert_eq!(stats.retcode, None);
    }

    #[test]
    fn test_start_execution_requires_prepared() {
        let mut stats = TaskExecStats::default();
        assert!(stats.start_execution().is_err());
    }

    #[test]
    fn test_task_info_json_field_names() {
        let info = TaskInfo::idle("t1", TaskStruct::default());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["exec_stats"]["state"], "idle");
        assert!(json["exec_stats"]["retcode"].is_null());
        assert_eq!(json["structure"]["executor"]["name"], "shell");
    }
}
