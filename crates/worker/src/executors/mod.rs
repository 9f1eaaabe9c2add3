//! Executor plugins: how a task actually runs.
//!
//! An executor spawns some unit of work and reports its output as a stream of
//! line events terminated by [`OutputEvent::Ended`] carrying the exit code.
//! Like resources, executors live in a static registry keyed by name.

mod shell;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dedalus_core::ExecutorSpec;
use semver::Version;
use tokio::sync::mpsc;

use crate::{Error, Result};

pub use shell::ShellExecutor;

/// One event from a running executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A line the subprocess wrote to stdout.
    Stdout(String),
    /// A line the subprocess wrote to stderr.
    Stderr(String),
    /// Execution ended; `None` means it was killed before reporting a code.
    Ended(Option<i32>),
}

/// Stream of [`OutputEvent`]s; `Ended` is always the last event.
pub type OutputStream = mpsc::Receiver<OutputEvent>;

/// A running unit of work.
#[async_trait]
pub trait Executor: Send {
    /// Plugin name.
    fn name(&self) -> &'static str;

    /// Plugin version.
    fn version(&self) -> Version;

    /// Directory the execution runs in; logs are written next to it.
    fn work_dir(&self) -> &Path;

    /// Start the work and return its output stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the work cannot be spawned.
    async fn start(&mut self) -> Result<OutputStream>;

    /// Whether the work is still alive.
    fn ping(&self) -> bool;

    /// Ask the work to terminate. Cooperative with [`Executor::start`]'s
    /// stream: the stream still delivers `Ended` after the kill.
    fn kill(&self);
}

/// Where an execution may put its working directory.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Root for all executions on this worker.
    pub execution_data_root: PathBuf,
    /// Id of this execution; the working directory is rooted under it.
    pub execution_id: String,
}

impl ExecutionContext {
    /// The working directory for this execution.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.execution_data_root.join(&self.execution_id)
    }
}

type ExecutorFactory = fn(&ExecutionContext, &ExecutorSpec) -> Result<Box<dyn Executor>>;

struct Registration {
    version: Version,
    construct: ExecutorFactory,
}

/// Registry of executor plugins, keyed by name.
#[derive(Default)]
pub struct ExecutorRegistry {
    plugins: HashMap<&'static str, Vec<Registration>>,
}

impl ExecutorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with all built-in executors.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            ShellExecutor::NAME,
            ShellExecutor::VERSION,
            ShellExecutor::construct,
        );
        registry
    }

    /// Register a plugin version. Versions of one name are kept ordered,
    /// newest last.
    pub fn register(&mut self, name: &'static str, version: Version, construct: ExecutorFactory) {
        let versions = self.plugins.entry(name).or_default();
        versions.push(Registration { version, construct });
        versions.sort_by(|a, b| a.version.cmp(&b.version));
    }

    /// Construct the newest registered version of `spec.name`, requiring it
    /// to satisfy `spec.min_version`.
    ///
    /// # Errors
    ///
    /// [`Error::ExecutorNotFound`] for an unknown name,
    /// [`Error::PluginVersionNotFound`] when every registered version is too
    /// old, or the plugin's own config decode error.
    pub fn construct(
        &self,
        context: &ExecutionContext,
        spec: &ExecutorSpec,
    ) -> Result<Box<dyn Executor>> {
        let newest = self
            .plugins
            .get(spec.name.as_str())
            .and_then(|versions| versions.last())
            .ok_or_else(|| Error::ExecutorNotFound {
                name: spec.name.clone(),
            })?;
        if newest.version < spec.min_version {
            return Err(Error::PluginVersionNotFound {
                name: spec.name.clone(),
                needed: spec.min_version.clone(),
                available: newest.version.clone(),
            });
        }
        (newest.construct)(context, spec)
    }

    /// Registered plugin names.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

pub(crate) fn decode_config<T: serde::de::DeserializeOwned>(
    plugin: &str,
    config: &serde_json::Value,
) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|source| Error::PluginConfig {
        plugin: plugin.to_string(),
        source,
    })
}
