//! Pod admission mutator
//!
//! Attaches one claim per matching `DiskConfig` to an incoming pod, together
//! with the metrics sidecar that reports the free space of those claims.
//!
//! Failures that stem from the cluster configuration (missing storage class,
//! unusable driver, colliding mount points) follow the strict flag: denied
//! with a status code in strict mode, admitted unmodified otherwise. Failures
//! of the API server are always denied.

use core::error::Error;
use std::sync::Arc;
use std::time::Duration;

use api_types::DiskConfig;
use api_types::CONFIG_LABEL;
use api_types::METRICS_LABEL;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use kube::core::admission::AdmissionRequest;
use kube::core::admission::AdmissionResponse;
use kube::ResourceExt;
use utils::naming::render_resource_name;

use crate::drivers::Driver;
use crate::drivers::DriverRegistry;
use crate::platform::k8s::claims;
use crate::platform::k8s::ClusterApi;

pub mod sidecar;

pub use sidecar::render_metrics_sidecar;

/// Deadline of one admission.
pub const ADMISSION_DEADLINE: Duration = Duration::from_secs(60);

const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum MutationError {
    #[display("Unable to fetch DiskConfigs")]
    ListConfigs,
    #[display("StorageClass not found: {name}")]
    StorageClassNotFound { name: String },
    #[display("Unable to fetch StorageClass {name}")]
    StorageClass { name: String },
    #[display("No usable driver for DiskConfig {config}")]
    Driver { config: String },
    #[display("Unable to create claim {claim}")]
    CreateClaim { claim: String },
    #[display("Mount point {mount_point} of {claim} is already used by {existing}")]
    MountPointCollision {
        mount_point: String,
        claim: String,
        existing: String,
    },
    #[display("Metrics sidecar template is invalid")]
    SidecarTemplate,
    #[display("Admission exceeded its deadline")]
    Timeout,
}

impl Error for MutationError {}

impl MutationError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::StorageClassNotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Whether the strict flag decides between denying and admitting.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::StorageClassNotFound { .. }
                | Self::Driver { .. }
                | Self::MountPointCollision { .. }
                | Self::SidecarTemplate
        )
    }
}

/// Admission decision for one pod.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Unchanged { reason: String },
    Patched(Box<Pod>),
    Denied { code: u16, message: String },
}

pub struct PodMutator {
    cluster: Arc<dyn ClusterApi>,
    drivers: DriverRegistry,
    strict: bool,
    scheduler_name: String,
}

impl PodMutator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        drivers: DriverRegistry,
        strict: bool,
        scheduler_name: String,
    ) -> Self {
        Self {
            cluster,
            drivers,
            strict,
            scheduler_name,
        }
    }

    /// Answers an admission request with a JSON patch or a denial.
    pub async fn review(&self, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
        let Some(pod) = request.object.clone() else {
            return denied(request, 400, "unable to decode request: no object");
        };
        let namespace = request
            .namespace
            .clone()
            .or_else(|| pod.namespace())
            .unwrap_or_default();

        let original = match serde_json::to_value(&pod) {
            Ok(value) => value,
            Err(e) => return denied(request, 400, &format!("unable to decode request: {e}")),
        };

        match self.mutate(pod, &namespace).await {
            Verdict::Unchanged { reason } => {
                tracing::info!(reason = %reason, "Pod admitted unmodified");
                AdmissionResponse::from(request)
            }
            Verdict::Denied { code, message } => denied(request, code, &message),
            Verdict::Patched(pod) => {
                let mutated = match serde_json::to_value(&pod) {
                    Ok(value) => value,
                    Err(e) => return denied(request, 500, &format!("unable to marshal pod: {e}")),
                };
                let patch = json_patch::diff(&original, &mutated);

                match AdmissionResponse::from(request).with_patch(patch) {
                    Ok(response) => response,
                    Err(e) => denied(request, 500, &format!("unable to serialize patch: {e}")),
                }
            }
        }
    }

    /// Decides the admission of `pod` created in `namespace`.
    #[tracing::instrument(skip(self, pod), fields(pod = %pod.name_any()))]
    pub async fn mutate(&self, pod: Pod, namespace: &str) -> Verdict {
        tracing::info!("Handling...");

        let result = tokio::time::timeout(ADMISSION_DEADLINE, self.attach_volumes(pod, namespace))
            .await
            .unwrap_or_else(|_| Err(Report::new(MutationError::Timeout)));

        match result {
            Ok(Some(pod)) => Verdict::Patched(Box::new(pod)),
            Ok(None) => Verdict::Unchanged {
                reason: "No sidecar injection".to_string(),
            },
            Err(report) => self.decide(&report),
        }
    }

    fn decide(&self, report: &Report<MutationError>) -> Verdict {
        let error = report.current_context();

        if error.is_policy() && !self.strict {
            tracing::warn!("Admitting pod unmodified: {report:?}");
            return Verdict::Unchanged {
                reason: error.to_string(),
            };
        }

        tracing::error!("Denying pod: {report:?}");
        Verdict::Denied {
            code: error.status_code(),
            message: error.to_string(),
        }
    }

    async fn attach_volumes(
        &self,
        mut pod: Pod,
        namespace: &str,
    ) -> Result<Option<Pod>, Report<MutationError>> {
        let configs = self
            .cluster
            .list_disk_configs(namespace)
            .await
            .change_context(MutationError::ListConfigs)?;

        // claim name and mount point, in admission order
        let mut volumes: Vec<(String, String)> = Vec::new();

        for config in configs.iter().filter(|config| !config.is_deleting()) {
            if !config.selects(pod.labels()) {
                continue;
            }

            pod.labels_mut()
                .insert(METRICS_LABEL.to_string(), config.name_any());

            tracing::info!(
                config = %config.name_any(),
                storage_class = %config.spec.storage_class_name,
                "Attach volume to workload..."
            );

            // one failing config aborts the whole pass, the strict flag then
            // decides for the pod as a whole instead of attaching a partial set
            let claim_name = self.ensure_claim(config, namespace).await?;
            let mount_point = config.mount_point(0);

            if let Some((existing, _)) = volumes.iter().find(|(_, used)| *used == mount_point) {
                return Err(Report::new(MutationError::MountPointCollision {
                    mount_point,
                    claim: claim_name,
                    existing: existing.clone(),
                }));
            }
            volumes.push((claim_name, mount_point));
        }

        if volumes.is_empty() {
            return Ok(None);
        }

        let sidecar = render_metrics_sidecar()?;

        let spec = pod.spec.get_or_insert_with(Default::default);
        let pod_volumes = spec.volumes.get_or_insert_with(Vec::new);
        for (claim_name, _) in &volumes {
            pod_volumes.push(Volume {
                name: claim_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.clone(),
                    read_only: None,
                }),
                ..Default::default()
            });
        }

        spec.scheduler_name = Some(self.scheduler_name.clone());
        spec.containers.push(sidecar);

        for container in &mut spec.containers {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            for (claim_name, mount_point) in &volumes {
                mounts.push(VolumeMount {
                    name: claim_name.clone(),
                    mount_path: mount_point.clone(),
                    ..Default::default()
                });
            }
        }

        tracing::info!(volumes = volumes.len(), "Volumes attached");
        Ok(Some(pod))
    }

    /// Creates the claim of `config`, an existing claim is reused.
    async fn ensure_claim(
        &self,
        config: &DiskConfig,
        namespace: &str,
    ) -> Result<String, Report<MutationError>> {
        let storage_class_name = &config.spec.storage_class_name;

        let storage_class = match self.cluster.get_storage_class(storage_class_name).await {
            Ok(storage_class) => storage_class,
            Err(e) if e.current_context().is_not_found() => {
                return Err(e.change_context(MutationError::StorageClassNotFound {
                    name: storage_class_name.clone(),
                }))
            }
            Err(e) => {
                return Err(e.change_context(MutationError::StorageClass {
                    name: storage_class_name.clone(),
                }))
            }
        };

        let driver = self
            .drivers
            .for_storage_class(&storage_class)
            .change_context_lazy(|| MutationError::Driver {
                config: config.name_any(),
            })?;

        let claim = build_claim(driver.as_ref(), config, namespace);
        let claim_name = claim.name_any();

        match self.cluster.create_claim(&claim).await {
            Ok(_) => tracing::info!(claim = %claim_name, "Claim created"),
            Err(e) if e.current_context().is_already_exists() => {
                tracing::info!(claim = %claim_name, "Claim already exists");
            }
            Err(e) => {
                return Err(e.change_context(MutationError::CreateClaim { claim: claim_name }))
            }
        }

        Ok(claim_name)
    }
}

/// Claim of `config` in `namespace`, named after the driver provisioner.
pub fn build_claim(driver: &dyn Driver, config: &DiskConfig, namespace: &str) -> PersistentVolumeClaim {
    let name = render_resource_name(driver.provisioner(), &config.name_any(), namespace);
    let mut claim = driver.pvc_stub(&name, namespace, &config.spec.storage_class_name);

    claim.finalizers_mut().push(config.finalizer());
    claim
        .labels_mut()
        .insert(CONFIG_LABEL.to_string(), config.name_any());
    claims::set_storage_request(&mut claim, config.spec.capacity.clone());

    let access_modes = if config.spec.access_modes.is_empty() {
        vec![DEFAULT_ACCESS_MODE.to_string()]
    } else {
        config.spec.access_modes.clone()
    };
    claim.spec.get_or_insert_with(Default::default).access_modes = Some(access_modes);

    claim
}

fn denied(request: &AdmissionRequest<Pod>, code: u16, message: &str) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(message);
    response.result.code = code;
    response
}
