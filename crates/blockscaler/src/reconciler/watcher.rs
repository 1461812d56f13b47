use std::collections::HashMap;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::watcher::Event;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::filter::admits;
use super::filter::ClaimEvent;
use super::filter::ClaimState;
use super::ClaimKey;
use super::ReconcileQueue;
use crate::platform::k8s::KubernetesError;

/// Remembers the last state of every claim to tell creates from updates.
#[derive(Debug, Default)]
pub struct ClaimTracker {
    states: HashMap<ClaimKey, ClaimState>,
}

impl ClaimTracker {
    /// Records an applied claim and returns the event it represents.
    pub fn observe(&mut self, claim: &PersistentVolumeClaim) -> (ClaimKey, ClaimEvent) {
        let key = ClaimKey::of(claim);
        let new = ClaimState::of(claim);

        let event = match self.states.insert(key.clone(), new.clone()) {
            Some(old) => ClaimEvent::Updated { old, new },
            None => ClaimEvent::Created(new),
        };
        (key, event)
    }

    pub fn forget(&mut self, claim: &PersistentVolumeClaim) -> (ClaimKey, ClaimEvent) {
        let key = ClaimKey::of(claim);
        self.states.remove(&key);
        (key, ClaimEvent::Deleted)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Watches claims in every namespace and feeds admitted keys to the queue.
pub struct ClaimWatcher {
    client: Client,
    queue: ReconcileQueue,
    tracker: ClaimTracker,
}

impl ClaimWatcher {
    pub fn new(client: Client, queue: ReconcileQueue) -> Self {
        Self {
            client,
            queue,
            tracker: ClaimTracker::default(),
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(mut self, token: CancellationToken) {
        info!("Starting claim watcher");

        loop {
            select! {
                _ = token.cancelled() => {
                    info!("Claim watcher shutdown requested");
                    break;
                }
                result = self.watch_claims() => {
                    match result {
                        Ok(()) => {
                            warn!("Claim watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Claim watch failed: {e:?}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }
    }

    async fn watch_claims(&mut self) -> Result<(), Report<KubernetesError>> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let mut stream = watcher(api, Config::default()).boxed();

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| {
                Report::new(KubernetesError::WatchFailed {
                    kind: "PersistentVolumeClaim",
                    message: format!("Watch stream error: {e}"),
                })
            })?;

            for (key, event) in handle_event(&mut self.tracker, event) {
                if admits(&event) {
                    self.queue.enqueue(key);
                }
            }
        }

        Ok(())
    }
}

/// Turns a raw watch event into filter events.
fn handle_event(
    tracker: &mut ClaimTracker,
    event: Event<PersistentVolumeClaim>,
) -> Vec<(ClaimKey, ClaimEvent)> {
    match event {
        Event::Applied(claim) => vec![tracker.observe(&claim)],
        Event::Deleted(claim) => vec![tracker.forget(&claim)],
        // relists replay every claim, known ones compare against their last state
        Event::Restarted(claims) => claims.iter().map(|claim| tracker.observe(claim)).collect(),
    }
}
