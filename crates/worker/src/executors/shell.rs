//! Shell executor: runs an argv in its own process group.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dedalus_core::ExecutorSpec;
use semver::Version;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ExecutionContext, Executor, OutputEvent, OutputStream, decode_config};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct ShellConfig {
    command: Vec<String>,
}

/// Runs an argv as a subprocess rooted in the execution's working directory.
///
/// The subprocess gets its own process group so a kill reaches everything it
/// spawned, not just the immediate child.
pub struct ShellExecutor {
    config: ShellConfig,
    work_dir: PathBuf,
    pid: AtomicU32,
}

impl ShellExecutor {
    /// Plugin name.
    pub const NAME: &'static str = "shell";
    /// Plugin version.
    pub const VERSION: Version = Version::new(0, 1, 0);

    /// Decode the spec's config blob into a plugin instance.
    ///
    /// # Errors
    ///
    /// Returns a config decode error for a malformed blob or an empty argv.
    pub fn construct(
        context: &ExecutionContext,
        spec: &ExecutorSpec,
    ) -> Result<Box<dyn Executor>> {
        let config = decode_config::<ShellConfig>(Self::NAME, &spec.config)?;
        if config.command.is_empty() {
            return Err(Error::PluginConfig {
                plugin: Self::NAME.to_string(),
                source: serde::de::Error::custom("command must not be empty"),
            });
        }
        Ok(Box::new(Self {
            config,
            work_dir: context.work_dir(),
            pid: AtomicU32::new(0),
        }))
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn version(&self) -> Version {
        Self::VERSION
    }

    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn start(&mut self) -> Result<OutputStream> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| {
                Error::io(format!("creating {}", self.work_dir.display()), source)
            })?;

        let mut command = Command::new(&self.config.command[0]);
        command
            .args(&self.config.command[1..])
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| {
            Error::io(format!("spawning '{}'", self.config.command[0]), source)
        })?;
        if let Some(pid) = child.id() {
            self.pid.store(pid, Ordering::SeqCst);
            debug!(pid, command = %self.config.command.join(" "), "spawned subprocess");
        }

        let (tx, rx) = mpsc::channel(256);

        let stdout = child.stdout.take();
        let stdout_tx = tx.clone();
        let stdout_reader = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stdout_tx.send(OutputEvent::Stdout(line)).await.is_err() {
                        break;
                    }
                }
            }
        });

        let stderr = child.stderr.take();
        let stderr_tx = tx.clone();
        let stderr_reader = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stderr_tx.send(OutputEvent::Stderr(line)).await.is_err() {
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = stdout_reader.await;
            let _ = stderr_reader.await;
            let retcode = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(error = %err, "waiting for subprocess failed");
                    None
                }
            };
            let _ = tx.send(OutputEvent::Ended(retcode)).await;
        });

        Ok(rx)
    }

    fn ping(&self) -> bool {
        let pid = self.pid.load(Ordering::SeqCst);
        pid != 0 && process_alive(pid)
    }

    fn kill(&self) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid != 0 {
            debug!(pid, "terminating subprocess group");
            terminate_group(pid);
        }
    }
}

/// Checks if a process is still alive.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only checks for process existence; the pid
    // came from a child this executor spawned.
    #[expect(unsafe_code, reason = "POSIX process existence check")]
    unsafe {
        libc::kill(pid as i32, 0) == 0
    }
}

/// Sends SIGTERM to a whole process group.
#[cfg(unix)]
fn terminate_group(pid: u32) {
    // SAFETY: kill with a negative pid signals the process group created by
    // process_group(0) at spawn time; SIGTERM requests graceful termination.
    #[expect(unsafe_code, reason = "POSIX signal handling")]
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
fn terminate_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(dir: &Path, argv: &[&str]) -> Box<dyn Executor> {
        ShellExecutor::construct(
            &ExecutionContext {
                execution_data_root: dir.to_path_buf(),
                execution_id: "exec".to_string(),
            },
            &ExecutorSpec {
                name: "shell".to_string(),
                min_version: Version::new(0, 0, 0),
                config: serde_json::json!({ "command": argv }),
            },
        )
        .unwrap()
    }

    async fn drain(mut rx: OutputStream) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_captures_both_streams_and_retcode() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = shell(dir.path(), &["sh", "-c", "echo one; echo two 1>&2; exit 3"]);
        let events = drain(executor.start().await.unwrap()).await;

        assert!(events.contains(&OutputEvent::Stdout("one".to_string())));
        assert!(events.contains(&OutputEvent::Stderr("two".to_string())));
        assert_eq!(events.last(), Some(&OutputEvent::Ended(Some(3))));
    }

    #[tokio::test]
    async fn test_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = shell(dir.path(), &["sh", "-c", "echo ok"]);
        let events = drain(executor.start().await.unwrap()).await;
        assert_eq!(events.last(), Some(&OutputEvent::Ended(Some(0))));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = shell(dir.path(), &["/definitely/not/a/binary"]);
        assert!(matches!(
            executor.start().await,
            Err(Error::Io { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_ends_long_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = shell(dir.path(), &["sh", "-c", "sleep 60"]);
        let mut rx = executor.start().await.unwrap();
        assert!(executor.ping());

        executor.kill();
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        // SIGTERM means no exit code.
        assert_eq!(last, Some(OutputEvent::Ended(None)));
    }

    #[test]
    fn test_empty_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShellExecutor::construct(
            &ExecutionContext {
                execution_data_root: dir.path().to_path_buf(),
                execution_id: "exec".to_string(),
            },
            &ExecutorSpec {
                name: "shell".to_string(),
                min_version: Version::new(0, 0, 0),
                config: serde_json::json!({ "command": [] }),
            },
        );
        assert!(matches!(result, Err(Error::PluginConfig { .. })));
    }
}
