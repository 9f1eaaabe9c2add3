//! Registry of running graph executors and entry point for state changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dedalus_core::{GraphInstanceInfo, GraphStruct, InstanceState, StateMachine};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::GraphExecutor;
use crate::store::MasterStore;
use crate::worker_client::WorkerConnector;
use crate::{Error, Result};

/// Shared engine state; executors hold an `Arc` of this.
pub struct EngineInner {
    pub(crate) store: MasterStore,
    pub(crate) workers: Arc<dyn WorkerConnector>,
    pub(crate) tick_interval: Duration,
    pub(crate) shutdown: CancellationToken,
    pub(crate) running_graphs: Mutex<HashMap<String, GraphExecutor>>,
}

/// The master's execution engine.
///
/// Owns the mutex-protected map of running [`GraphExecutor`]s, routes
/// external state-change requests, and revives running instances at startup.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Build the engine and revive every instance the store still marks
    /// `running` (crash recovery).
    ///
    /// # Errors
    ///
    /// Propagates store failures from the revival scan.
    pub async fn new(
        store: MasterStore,
        workers: Arc<dyn WorkerConnector>,
        tick_interval: Duration,
    ) -> Result<Self> {
        let engine = Self {
            inner: Arc::new(EngineInner {
                store,
                workers,
                tick_interval,
                shutdown: CancellationToken::new(),
                running_graphs: Mutex::new(HashMap::new()),
            }),
        };
        engine.spawn_running_graphs().await?;
        Ok(engine)
    }

    async fn spawn_running_graphs(&self) -> Result<()> {
        let mut running = self.inner.running_graphs.lock().await;
        for (instance_id, info) in self.inner.store.list_instances(true)? {
            let Some(info) = info else { continue };
            if info.exec_stats.state == InstanceState::Running {
                info!(instance = %instance_id, "resuming running instance");
                running.insert(
                    instance_id.clone(),
                    GraphExecutor::spawn(Arc::clone(&self.inner), instance_id),
                );
            }
        }
        Ok(())
    }

    /// Validate and persist `graph` as a new revision of `name`.
    ///
    /// # Errors
    ///
    /// Validation failures and store failures.
    pub fn add_graph_struct(&self, name: &str, graph: GraphStruct) -> Result<u64> {
        if name.is_empty() {
            return Err(Error::InvalidRequest {
                message: "graph name should be a non-empty string".to_string(),
            });
        }
        graph.verify()?;
        self.inner.store.add_graph_struct(name, graph)
    }

    /// Persist a fresh idle instance snapshotting `graph`. Execution starts
    /// only with an explicit state change to `running`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn add_graph_instance(
        &self,
        instance_id: &str,
        graph: GraphStruct,
    ) -> Result<GraphInstanceInfo> {
        let instance = GraphInstanceInfo::launch(instance_id, graph);
        self.inner.store.write_instance(&instance)?;
        info!(
            instance = %instance_id,
            graph = %instance.structure.graph_name,
            revision = instance.structure.revision,
            "created graph instance"
        );
        Ok(instance)
    }

    /// Route an external state-change request, returning the prior state.
    ///
    /// A running instance's executor handles its own request; otherwise the
    /// transition is validated against the store, persisted for non-running
    /// targets, and `running` spawns a fresh executor.
    ///
    /// # Errors
    ///
    /// Unknown instances, forbidden transitions and store failures.
    pub async fn set_graph_instance_state(
        &self,
        instance_id: &str,
        target: InstanceState,
    ) -> Result<InstanceState> {
        let mut running = self.inner.running_graphs.lock().await;
        if let Some(executor) = running.get(instance_id) {
            return executor.set_state(&self.inner, target);
        }

        let mut instance = self.inner.store.read_instance(instance_id)?;
        let prior = instance.exec_stats.state;
        instance
            .exec_stats
            .state
            .change_state(target, false)
            .map_err(dedalus_core::Error::from)?;
        if target == InstanceState::Running {
            running.insert(
                instance_id.to_string(),
                GraphExecutor::spawn(Arc::clone(&self.inner), instance_id.to_string()),
            );
        } else if prior != target {
            self.inner.store.write_instance(&instance)?;
        }
        Ok(prior)
    }

    /// Signal every running executor to wind down without persisting state;
    /// instances stay `running` in the store and resume at next boot.
    pub async fn shutdown(&self) {
        let running = self.inner.running_graphs.lock().await;
        if !running.is_empty() {
            warn!(count = running.len(), "shutting down with running instances");
        }
        self.inner.shutdown.cancel();
    }

    /// The typed store this engine persists through.
    #[must_use]
    pub fn store(&self) -> &MasterStore {
        &self.inner.store
    }

    /// The connector used to reach workers.
    #[must_use]
    pub fn workers(&self) -> Arc<dyn WorkerConnector> {
        Arc::clone(&self.inner.workers)
    }

    /// Whether an executor is currently registered for `instance_id`.
    pub async fn is_running(&self, instance_id: &str) -> bool {
        self.inner
            .running_graphs
            .lock()
            .await
            .contains_key(instance_id)
    }
}
