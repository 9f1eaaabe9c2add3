//! Cron-style scheduler: launches scheduled graphs when their rule fires.

use std::time::Duration;

use chrono::Utc;
use dedalus_core::InstanceState;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::store::MasterStore;
use crate::Result;

/// Background supervisor that polls the schedule collection and launches an
/// instance of a graph's latest revision whenever its cron rule fires.
pub struct Scheduler {
    stop: CancellationToken,
    join: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the scheduler loop.
    #[must_use]
    pub fn spawn(store: MasterStore, engine: Engine, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let loop_stop = stop.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = loop_stop.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        if let Err(err) = Self::tick(&store, &engine).await {
                            warn!(error = %err, "scheduler tick failed");
                        }
                    }
                }
            }
        });
        Self { stop, join }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop.cancel();
        let _ = self.join.await;
    }

    async fn tick(store: &MasterStore, engine: &Engine) -> Result<()> {
        let now = Utc::now();
        for mut schedule in store.list_schedules()? {
            match schedule.should_trigger(now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(graph = %schedule.graph_name, error = %err, "skipping broken schedule");
                    continue;
                }
            }

            let graph = store.read_graph_struct(&schedule.graph_name, None)?;
            let instance_id = Uuid::new_v4().simple().to_string();
            info!(
                graph = %schedule.graph_name,
                revision = graph.revision,
                instance = %instance_id,
                "schedule fired, launching instance"
            );
            engine.add_graph_instance(&instance_id, graph)?;
            engine
                .set_graph_instance_state(&instance_id, InstanceState::Running)
                .await?;
            schedule.mark_triggered(now);
            store.write_schedule(&schedule)?;
        }
        Ok(())
    }
}
