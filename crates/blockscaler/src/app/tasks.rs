use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::AdmissionServer;
use crate::app::core::Application;
use crate::reconciler;
use crate::reconciler::ClaimWatcher;
use crate::reconciler::ReconcileQueue;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) -> Result<()> {
        let cli = app.daemon_args();

        if cli.enable_monitor {
            let monitor_task = self.spawn_monitor_task(app);
            self.tasks.push(monitor_task);
        }

        if cli.enable_reconciler {
            let (queue, receiver) = ReconcileQueue::new();

            let watcher_task = self.spawn_claim_watcher_task(app, queue.clone());
            self.tasks.push(watcher_task);

            let worker_task = self.spawn_reconcile_worker_task(app, queue, receiver);
            self.tasks.push(worker_task);
        }

        if cli.enable_webhook {
            let webhook_task = self.spawn_webhook_task(app);
            self.tasks.push(webhook_task);
        }

        if self.tasks.is_empty() {
            return Err(anyhow::anyhow!(
                "Nothing to run: monitor, reconciler and webhook are all disabled"
            ));
        }

        Ok(())
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();

                self.wait_for_tasks_with_timeout(Duration::from_secs(30)).await;
            }
            // Wait for any task to complete unexpectedly
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_monitor_task(&self, app: &Application) -> JoinHandle<()> {
        let monitor = app.services().monitor.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting volume monitor task");
            monitor.run(token).await;
            tracing::info!("Volume monitor task completed");
        })
    }

    fn spawn_claim_watcher_task(&self, app: &Application, queue: ReconcileQueue) -> JoinHandle<()> {
        let watcher = ClaimWatcher::new(app.services().client.clone(), queue);
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting claim watcher task");
            watcher.run(token).await;
            tracing::info!("Claim watcher task completed");
        })
    }

    fn spawn_reconcile_worker_task(
        &self,
        app: &Application,
        queue: ReconcileQueue,
        receiver: tokio::sync::mpsc::UnboundedReceiver<reconciler::ClaimKey>,
    ) -> JoinHandle<()> {
        let reconciler = app.services().reconciler.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting reconcile worker task");
            reconciler::run_worker(reconciler, queue, receiver, token).await;
            tracing::info!("Reconcile worker task completed");
        })
    }

    fn spawn_webhook_task(&self, app: &Application) -> JoinHandle<()> {
        let cli = app.daemon_args();
        let server = AdmissionServer::new(
            app.services().mutator.clone(),
            cli.webhook_listen_addr.clone(),
            cli.tls_files(),
        );
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting admission webhook task");
            if let Err(e) = server.run(token).await {
                tracing::error!("Admission webhook failed: {e:?}");
            } else {
                tracing::info!("Admission webhook task completed");
            }
        })
    }
}
