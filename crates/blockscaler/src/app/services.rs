use std::sync::Arc;

use kube::Client;

use crate::gate::OperationGate;
use crate::monitor::VolumeMonitor;
use crate::mutator::PodMutator;
use crate::reconciler::ClaimReconciler;

/// Application dependencies - simple struct with Arc-wrapped services
pub struct ApplicationServices {
    pub client: Client,
    pub monitor: Arc<VolumeMonitor>,
    pub reconciler: Arc<ClaimReconciler>,
    pub mutator: Arc<PodMutator>,
    pub gate: OperationGate,
}
