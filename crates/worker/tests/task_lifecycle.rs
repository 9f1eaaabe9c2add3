//! End-to-end lifecycle tests for the worker engine.

use std::sync::Arc;
use std::time::Duration;

use dedalus_core::{
    ExecutorSpec, LogStream, ResourceSpec, StateMachine, TaskState, TaskStruct,
};
use dedalus_store::Store;
use dedalus_worker::{WorkerConfig, WorkerEngine};
use tempfile::TempDir;

fn engine_in(dir: &TempDir) -> Arc<WorkerEngine> {
    let config = WorkerConfig {
        execution_data_root: dir.path().join("data"),
        store_path: dir.path().join("db"),
        ..WorkerConfig::default()
    };
    let store = Store::temporary().unwrap();
    Arc::new(WorkerEngine::new(&config, &store).unwrap())
}

fn shell_task(argv: &[&str]) -> TaskStruct {
    TaskStruct {
        resources: Vec::new(),
        executor: ExecutorSpec {
            name: "shell".to_string(),
            min_version: semver::Version::new(0, 0, 0),
            config: serde_json::json!({ "command": argv }),
        },
    }
}

async fn wait_terminal(engine: &WorkerEngine, task_id: &str) -> TaskState {
    for _ in 0..500 {
        let state = engine.task_state(task_id).unwrap();
        if state.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

#[tokio::test]
async fn test_echo_task_finishes_and_logs() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);

    let info = engine
        .create_idle_task(shell_task(&["sh", "-c", "echo ok"]))
        .unwrap();
    assert_eq!(info.exec_stats.state, TaskState::Idle);

    let prior = engine
        .set_task_state(&info.task_id, TaskState::Preparing)
        .await
        .unwrap();
    assert_eq!(prior, TaskState::Idle);

    assert_eq!(wait_terminal(&engine, &info.task_id).await, TaskState::Finished);

    let stats = engine.task_info(&info.task_id).unwrap().exec_stats;
    assert_eq!(stats.retcode, Some(0));
    assert!(stats.prep_start_time.unwrap() <= stats.prep_finish_time.unwrap());
    assert!(stats.start_time.unwrap() <= stats.finish_time.unwrap());

    let out = engine.task_log(&info.task_id, LogStream::Out).await.unwrap();
    assert_eq!(out, "ok\n");
    let err = engine.task_log(&info.task_id, LogStream::Err).await.unwrap();
    assert!(err.is_empty());
}

#[tokio::test]
async fn test_nonzero_exit_fails() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);

    let info = engine
        .create_idle_task(shell_task(&["sh", "-c", "echo doomed 1>&2; exit 1"]))
        .unwrap();
    engine
        .set_task_state(&info.task_id, TaskState::Preparing)
        .await
        .unwrap();

    assert_eq!(wait_terminal(&engine, &info.task_id).await, TaskState::Failed);
    let stats = engine.task_info(&info.task_id).unwrap().exec_stats;
    assert_eq!(stats.retcode, Some(1));

    let err = engine.task_log(&info.task_id, LogStream::Err).await.unwrap();
    assert_eq!(err, "doomed\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_kills_running_task() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);

    let info = engine
        .create_idle_task(shell_task(&["sh", "-c", "sleep 60"]))
        .unwrap();
    engine
        .set_task_state(&info.task_id, TaskState::Preparing)
        .await
        .unwrap();

    // Wait until it is actually running before stopping it.
    for _ in 0..500 {
        if engine.task_state(&info.task_id).unwrap() == TaskState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        engine.task_state(&info.task_id).unwrap(),
        TaskState::Running
    );

    engine
        .set_task_state(&info.task_id, TaskState::Stopped)
        .await
        .unwrap();
    assert_eq!(wait_terminal(&engine, &info.task_id).await, TaskState::Stopped);
    let stats = engine.task_info(&info.task_id).unwrap().exec_stats;
    assert_eq!(stats.retcode, None);
}

#[tokio::test]
async fn test_missing_resource_prepfails() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);

    let mut structure = shell_task(&["sh", "-c", "echo never"]);
    structure.resources.push(ResourceSpec {
        name: "local_file".to_string(),
        min_version: semver::Version::new(0, 0, 0),
        config: serde_json::json!({
            "local_path": dir.path().join("missing.txt")
        }),
    });

    let info = engine.create_idle_task(structure).unwrap();
    engine
        .set_task_state(&info.task_id, TaskState::Preparing)
        .await
        .unwrap();

    assert_eq!(
        wait_terminal(&engine, &info.task_id).await,
        TaskState::PrepFailed
    );
    let stats = engine.task_info(&info.task_id).unwrap().exec_stats;
    assert!(stats.prep_msg.unwrap().contains("not installable"));
    // The executor never ran.
    assert!(stats.start_time.is_none());
    assert_eq!(stats.retcode, None);
}

#[tokio::test]
async fn test_stop_idle_task_directly() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);

    let info = engine
        .create_idle_task(shell_task(&["sh", "-c", "echo never"]))
        .unwrap();
    let prior = engine
        .set_task_state(&info.task_id, TaskState::Stopped)
        .await
        .unwrap();
    assert_eq!(prior, TaskState::Idle);
    assert_eq!(
        engine.task_state(&info.task_id).unwrap(),
        TaskState::Stopped
    );

    // A stopped task cannot be started.
    let result = engine
        .set_task_state(&info.task_id, TaskState::Preparing)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_unknown_task() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    assert!(
        engine
            .set_task_state("missing", TaskState::Preparing)
            .await
            .is_err()
    );
}
