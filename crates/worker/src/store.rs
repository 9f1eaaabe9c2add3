//! Typed view of the worker's task collection.

use dedalus_core::{TaskInfo, TaskState};
use dedalus_store::{Collection, Store};

use crate::{Error, Result};

/// Task persistence for one worker.
#[derive(Clone)]
pub struct WorkerStore {
    tasks: Collection,
}

impl WorkerStore {
    /// Wrap the `tasks` collection of `store`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn new(store: &Store) -> Result<Self> {
        Ok(Self {
            tasks: store.collection("tasks")?,
        })
    }

    /// Read a task.
    ///
    /// # Errors
    ///
    /// [`Error::TaskNotFound`] if no such task exists.
    pub fn read_task_info(&self, task_id: &str) -> Result<TaskInfo> {
        self.tasks
            .get(task_id)?
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Create or replace a task document.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn write_task_info(&self, info: &TaskInfo) -> Result<()> {
        self.tasks.put(&info.task_id, info)?;
        Ok(())
    }

    /// Current state of a task.
    ///
    /// # Errors
    ///
    /// [`Error::TaskNotFound`] if no such task exists.
    pub fn read_task_state(&self, task_id: &str) -> Result<TaskState> {
        Ok(self.read_task_info(task_id)?.exec_stats.state)
    }

    /// All known tasks; infos are omitted unless `with_info` is set.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn list_tasks(&self, with_info: bool) -> Result<Vec<(String, Option<TaskInfo>)>> {
        if with_info {
            self.tasks
                .iterate::<TaskInfo>()
                .map(|entry| {
                    let (task_id, info) = entry?;
                    Ok((task_id, Some(info)))
                })
                .collect()
        } else {
            self.tasks
                .keys()
                .map(|key| Ok((key?, None)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedalus_core::TaskStruct;

    #[test]
    fn test_round_trip_and_listing() {
        let store = Store::temporary().unwrap();
        let tasks = WorkerStore::new(&store).unwrap();

        assert!(matches!(
            tasks.read_task_info("missing"),
            Err(Error::TaskNotFound { .. })
        ));

        let info = TaskInfo::idle("t1", TaskStruct::default());
        tasks.write_task_info(&info).unwrap();
        assert_eq!(tasks.read_task_info("t1").unwrap(), info);
        assert_eq!(
            tasks.read_task_state("t1").unwrap(),
            dedalus_core::TaskState::Idle
        );

        let listed = tasks.list_tasks(false).unwrap();
        assert_eq!(listed, vec![("t1".to_string(), None)]);
        let listed = tasks.list_tasks(true).unwrap();
        assert_eq!(listed[0].1.as_ref().unwrap(), &info);
    }
}
