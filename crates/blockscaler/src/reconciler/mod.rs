//! Claim reconciler
//!
//! Mirrors the phase of every managed claim into the status of its
//! `DiskConfig` and releases the finalizer of deleted claims. Keys are
//! processed one at a time by a single worker.

use core::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use api_types::DiskConfig;
use api_types::DiskConfigStatus;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::gate::OperationGate;
use crate::platform::k8s::claims;
use crate::platform::k8s::ClusterApi;
use crate::platform::k8s::ClusterError;

pub mod filter;
pub mod watcher;

pub use filter::ClaimState;
pub use watcher::ClaimWatcher;

/// Delay before a key is retried.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Deadline of a single reconcile.
pub const RECONCILE_DEADLINE: Duration = Duration::from_secs(60);

/// Namespaced name of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimKey {
    pub namespace: String,
    pub name: String,
}

impl ClaimKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(claim: &PersistentVolumeClaim) -> Self {
        Self::new(claim.namespace().unwrap_or_default(), claim.name_any())
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, derive_more::Display)]
pub enum ReconcileError {
    #[display("Another operation is in progress")]
    Busy,
    #[display("Reconcile of {key} exceeded its deadline")]
    Timeout { key: String },
    #[display("Cluster request failed: {operation}")]
    Cluster { operation: &'static str },
}

impl Error for ReconcileError {}

/// What a successful reconcile did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    ClaimGone,
    Unmanaged,
    ConfigMissing,
    StatusUnchanged,
    StatusUpdated,
    /// A concurrent writer won, the next event retries.
    Conflict,
    FinalizerReleased,
}

pub struct ClaimReconciler {
    cluster: Arc<dyn ClusterApi>,
    gate: OperationGate,
    deadline: Duration,
}

impl ClaimReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, gate: OperationGate) -> Self {
        Self {
            cluster,
            gate,
            deadline: RECONCILE_DEADLINE,
        }
    }

    /// Reconciles one claim while holding the operation gate.
    #[tracing::instrument(skip(self), fields(claim = %key))]
    pub async fn reconcile(
        &self,
        key: &ClaimKey,
    ) -> Result<ReconcileOutcome, Report<ReconcileError>> {
        let Some(_guard) = self.gate.try_acquire("reconciler") else {
            return Err(Report::new(ReconcileError::Busy));
        };

        tokio::time::timeout(self.deadline, self.reconcile_claim(key))
            .await
            .map_err(|_| {
                Report::new(ReconcileError::Timeout {
                    key: key.to_string(),
                })
            })?
    }

    async fn reconcile_claim(
        &self,
        key: &ClaimKey,
    ) -> Result<ReconcileOutcome, Report<ReconcileError>> {
        let claim = match self.cluster.get_claim(&key.namespace, &key.name).await {
            Ok(claim) => claim,
            Err(e) if e.current_context().is_not_found() => {
                tracing::debug!("Claim is gone");
                return Ok(ReconcileOutcome::ClaimGone);
            }
            Err(e) => {
                return Err(e.change_context(ReconcileError::Cluster {
                    operation: "get_claim",
                }))
            }
        };

        let state = ClaimState::of(&claim);
        if !state.is_managed() {
            return Ok(ReconcileOutcome::Unmanaged);
        }
        let Some(config_name) = claims::config_name(&claim) else {
            return Ok(ReconcileOutcome::Unmanaged);
        };

        let config = match self.cluster.get_disk_config(&key.namespace, config_name).await {
            Ok(config) => config,
            Err(e) if e.current_context().is_not_found() => {
                tracing::info!(config = %config_name, "DiskConfig of claim not found");
                return Ok(ReconcileOutcome::ConfigMissing);
            }
            Err(e) => {
                return Err(e.change_context(ReconcileError::Cluster {
                    operation: "get_disk_config",
                }))
            }
        };

        if state == ClaimState::ManagedDeleting {
            return self.finish_deletion(config, claim).await;
        }

        let phase = claims::phase(&claim);
        let mut status = config.status.clone().unwrap_or_default();
        if status.persistent_volume_claims.get(&key.name) == Some(&phase) {
            return Ok(ReconcileOutcome::StatusUnchanged);
        }

        tracing::info!(phase = %phase, config = %config.name_any(), "Recording claim phase");
        status
            .persistent_volume_claims
            .insert(key.name.clone(), phase);
        self.write_status(config, status).await
    }

    /// Drops the status entry, then lets the platform delete the claim.
    async fn finish_deletion(
        &self,
        config: DiskConfig,
        mut claim: PersistentVolumeClaim,
    ) -> Result<ReconcileOutcome, Report<ReconcileError>> {
        let claim_name = claim.name_any();
        let finalizer = config.finalizer();

        let mut status = config.status.clone().unwrap_or_default();
        if status.persistent_volume_claims.remove(&claim_name).is_some() {
            tracing::info!(config = %config.name_any(), "Removing deleted claim from status");
            if self.write_status(config, status).await? == ReconcileOutcome::Conflict {
                return Ok(ReconcileOutcome::Conflict);
            }
        }

        if !claims::remove_finalizer(&mut claim, &finalizer) {
            return Ok(ReconcileOutcome::StatusUpdated);
        }

        match self.cluster.replace_claim(&claim).await {
            Ok(_) => {
                tracing::info!(finalizer = %finalizer, "Finalizer released");
                Ok(ReconcileOutcome::FinalizerReleased)
            }
            Err(e) if is_transient_miss(e.current_context()) => {
                tracing::info!("Claim changed before its finalizer was released: {e:?}");
                Ok(ReconcileOutcome::Conflict)
            }
            Err(e) => Err(e.change_context(ReconcileError::Cluster {
                operation: "replace_claim",
            })),
        }
    }

    async fn write_status(
        &self,
        mut config: DiskConfig,
        status: DiskConfigStatus,
    ) -> Result<ReconcileOutcome, Report<ReconcileError>> {
        config.status = Some(status);

        match self.cluster.replace_disk_config_status(&config).await {
            Ok(_) => Ok(ReconcileOutcome::StatusUpdated),
            Err(e) if is_transient_miss(e.current_context()) => {
                tracing::info!(config = %config.name_any(), "Status update lost a race: {e:?}");
                Ok(ReconcileOutcome::Conflict)
            }
            Err(e) => Err(e.change_context(ReconcileError::Cluster {
                operation: "replace_disk_config_status",
            })),
        }
    }
}

fn is_transient_miss(error: &ClusterError) -> bool {
    error.is_conflict() || error.is_not_found()
}

/// Sending half of the reconcile queue.
#[derive(Clone)]
pub struct ReconcileQueue {
    sender: mpsc::UnboundedSender<ClaimKey>,
}

impl ReconcileQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClaimKey>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, key: ClaimKey) {
        if let Err(e) = self.sender.send(key) {
            tracing::warn!("Reconcile queue closed, dropping {}", e.0);
        }
    }

    /// Enqueues the key again once `delay` elapsed.
    pub fn enqueue_after(&self, key: ClaimKey, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }
}

/// Drains the queue with exactly one reconcile in flight.
pub async fn run_worker(
    reconciler: Arc<ClaimReconciler>,
    queue: ReconcileQueue,
    mut receiver: mpsc::UnboundedReceiver<ClaimKey>,
    token: CancellationToken,
) {
    tracing::info!("Starting reconcile worker");

    loop {
        let key = tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("Reconcile worker cancelled");
                break;
            }
            key = receiver.recv() => match key {
                Some(key) => key,
                None => break,
            },
        };

        match reconciler.reconcile(&key).await {
            Ok(outcome) => tracing::debug!(claim = %key, ?outcome, "Reconciled"),
            Err(e) if matches!(e.current_context(), ReconcileError::Busy) => {
                tracing::debug!(claim = %key, "Gate busy, requeueing");
                queue.enqueue_after(key, REQUEUE_DELAY);
            }
            Err(e) => {
                tracing::error!(claim = %key, "Reconcile failed: {e:?}");
                queue.enqueue_after(key, REQUEUE_DELAY);
            }
        }
    }
}
