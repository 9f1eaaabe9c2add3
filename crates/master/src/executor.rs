//! Long-running supervisor for one graph instance.

use std::sync::Arc;

use dedalus_core::{InstanceState, StateMachine};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engine::EngineInner;
use crate::mentor::GraphMentor;
use crate::{Error, Result};

/// Handle to a spawned [`GraphExecutor`] supervision task.
pub struct GraphExecutor {
    instance_id: String,
    user_stop: CancellationToken,
    #[allow(dead_code)]
    join: JoinHandle<()>,
}

impl GraphExecutor {
    /// Spawn the supervisor for `instance_id`.
    ///
    /// The task loads the instance, starts execution if it is still idle,
    /// then ticks a [`GraphMentor`] until it is done. Any uncaught error
    /// marks the instance failed; on exit the executor deregisters itself
    /// from the engine under the engine lock.
    pub fn spawn(engine: Arc<EngineInner>, instance_id: String) -> Self {
        let user_stop = CancellationToken::new();
        let supervisor_stop = user_stop.clone();
        let supervisor_id = instance_id.clone();
        let join = tokio::spawn(async move {
            Self::run(engine, supervisor_id, supervisor_stop).await;
        });
        Self {
            instance_id,
            user_stop,
            join,
        }
    }

    /// Validate and apply an external state-change request, returning the
    /// prior state. Called under the engine lock.
    ///
    /// A request for `stopped` only flags the supervisor; the final state is
    /// persisted by the supervisor when its next tick observes the flag, so
    /// readers may still see `running` briefly. Any other target is
    /// persisted immediately.
    ///
    /// # Errors
    ///
    /// Forbidden transitions and store failures.
    pub fn set_state(&self, engine: &EngineInner, target: InstanceState) -> Result<InstanceState> {
        let mut state = engine.store.read_instance_state(&self.instance_id)?;
        let prior = state;
        state
            .change_state(target, false)
            .map_err(dedalus_core::Error::from)?;
        if prior != target {
            if target == InstanceState::Stopped {
                self.user_stop.cancel();
            } else {
                let mut instance = engine.store.read_instance(&self.instance_id)?;
                instance
                    .exec_stats
                    .state
                    .change_state(target, false)
                    .map_err(dedalus_core::Error::from)?;
                engine.store.write_instance(&instance)?;
            }
        }
        Ok(prior)
    }

    async fn run(engine: Arc<EngineInner>, instance_id: String, user_stop: CancellationToken) {
        debug!(instance = %instance_id, "start executing");
        if let Err(err) = Self::drive(&engine, &instance_id, &user_stop).await {
            error!(instance = %instance_id, error = %err, "instance execution failed");
            Self::mark_failed(&engine, &instance_id, &err);
        }
        engine.running_graphs.lock().await.remove(&instance_id);
        debug!(instance = %instance_id, "stop executing");
    }

    async fn drive(
        engine: &Arc<EngineInner>,
        instance_id: &str,
        user_stop: &CancellationToken,
    ) -> Result<()> {
        let mut instance = engine.store.read_instance(instance_id)?;
        if instance.exec_stats.state == InstanceState::Idle {
            instance.exec_stats.start_execution()?;
            instance.init_per_task_execution_info();
            engine.store.write_instance(&instance)?;
            instance = engine.store.read_instance(instance_id)?;
        }

        let mut mentor = GraphMentor::new(
            instance,
            engine.store.clone(),
            Arc::clone(&engine.workers),
            engine.shutdown.clone(),
            user_stop.clone(),
        )?;
        while !mentor.is_done() {
            tokio::time::sleep(engine.tick_interval).await;
            mentor.tick().await?;
        }
        Ok(())
    }

    fn mark_failed(engine: &EngineInner, instance_id: &str, err: &Error) {
        let failed = engine
            .store
            .read_instance(instance_id)
            .and_then(|mut instance| {
                instance.exec_stats.finish_execution(
                    true,
                    false,
                    Some(err.to_string()),
                )?;
                engine.store.write_instance(&instance)
            });
        if let Err(write_err) = failed {
            error!(
                instance = %instance_id,
                error = %write_err,
                "could not persist failure state"
            );
        }
    }
}
