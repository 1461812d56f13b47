use std::time::Duration;

use anyhow::Result;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::DaemonArgs;
use crate::gate::GateGuard;
use crate::gate::OperationGate;

/// How long shutdown waits for an in flight cycle or reconcile.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    daemon_args: DaemonArgs,
}

impl Application {
    pub fn new(services: ApplicationServices, daemon_args: DaemonArgs) -> Self {
        Self {
            services,
            daemon_args,
        }
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    pub fn daemon_args(&self) -> &DaemonArgs {
        &self.daemon_args
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();

        if let Err(e) = tasks.spawn_all_tasks(self) {
            tracing::error!("Failed to spawn application tasks: {}", e);
            return Err(e);
        }

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }

    /// Waits for the volume operation still holding the gate, if any.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");

        let Some(_held) = drain_operations(&self.services.gate, SHUTDOWN_GRACE).await else {
            return Err(anyhow::anyhow!(
                "Volume operation still running after {SHUTDOWN_GRACE:?}"
            ));
        };

        tracing::info!("Application shutdown completed");
        Ok(())
    }
}

/// Holds `gate` once the running operation finishes, `None` when it still
/// runs after `grace`.
pub(crate) async fn drain_operations(gate: &OperationGate, grace: Duration) -> Option<GateGuard> {
    if gate.is_busy() {
        tracing::info!("Waiting for the running volume operation to finish");
    }

    let guard = gate.drain("shutdown", grace).await;
    if guard.is_none() {
        tracing::warn!("Volume operation did not finish within {grace:?}");
    }
    guard
}
