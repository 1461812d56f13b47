//! Volume monitor
//!
//! Every tick the monitor scrapes the metrics sidecars behind the labeled
//! endpoints, correlates free space samples with the managed claims of each
//! pod and grows the claims running out of space.

use core::error::Error;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use api_types::DiskConfig;
use api_types::CLAIM_LABEL;
use api_types::CONFIG_LABEL;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use crate::drivers::DriverRegistry;
use crate::gate::OperationGate;
use crate::jobs;
use crate::jobs::FileSystem;
use crate::jobs::ResizeJobParams;
use crate::metrics;
use crate::metrics::exposition;
use crate::metrics::VolumeMetrics;
use crate::platform::k8s::claims;
use crate::platform::k8s::ClusterApi;
use crate::platform::scrape::MetricsScraper;
use crate::quantity;

pub mod decision;

pub use decision::evaluate;
pub use decision::GrowthDecision;

/// Free space metric of the node exporter.
pub const AVAILABLE_BYTES_METRIC: &str = "node_filesystem_avail_bytes";

/// File system assumed when the persistent volume does not tell.
const DEFAULT_FILE_SYSTEM: &str = "ext4";

#[derive(Debug, derive_more::Display)]
pub enum MonitorError {
    #[display("Failed to parse metric line")]
    Parse,
    #[display("Metric line has no {label} label")]
    MissingLabel { label: &'static str },
    #[display("No volume of pod {pod} is mounted at {mount_point}")]
    VolumeNotFound { pod: String, mount_point: String },
    #[display("Cluster request failed: {operation}")]
    Cluster { operation: &'static str },
    #[display("Invalid quantity in {field}")]
    Quantity { field: &'static str },
    #[display("Claim {claim} has no {field}")]
    MissingField { claim: String, field: &'static str },
    #[display("No driver for claim {claim}")]
    Driver { claim: String },
    #[display("Failed to render resize job for {claim}")]
    Render { claim: String },
}

impl Error for MonitorError {}

/// Result of one sample evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// The sample belongs to another mount point.
    OtherMountPoint,
    /// The claim does not carry the config finalizer.
    Unmanaged,
    /// The backend is still expanding the volume.
    Resizing,
    /// A resize job was created for the file system.
    ResizeJobCreated { job: String },
    /// A file system resize is pending and already handled.
    ResizePending,
    Evaluated(GrowthDecision),
}

/// Summary of one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    pub samples: usize,
    pub evaluated: usize,
    pub resized: Vec<String>,
    pub resize_jobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another operation holds the gate.
    Busy,
    /// Listing endpoints failed.
    Failed,
    /// No free space samples were scraped.
    NoMetrics,
    Completed(CycleStats),
}

type PodKey = (String, String);

/// Periodic growth loop over every managed volume.
pub struct VolumeMonitor {
    cluster: Arc<dyn ClusterApi>,
    scraper: Arc<dyn MetricsScraper>,
    drivers: DriverRegistry,
    gate: OperationGate,
    interval: Duration,
}

impl VolumeMonitor {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        scraper: Arc<dyn MetricsScraper>,
        drivers: DriverRegistry,
        gate: OperationGate,
        interval: Duration,
    ) -> Self {
        Self {
            cluster,
            scraper,
            drivers,
            gate,
            interval,
        }
    }

    /// Deadline of one cycle, one second shorter than the interval.
    pub fn cycle_deadline(&self) -> Duration {
        self.interval
            .checked_sub(Duration::from_secs(1))
            .filter(|deadline| !deadline.is_zero())
            .unwrap_or(self.interval)
    }

    /// Runs cycles until cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Volume monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let deadline = self.cycle_deadline();
                    match tokio::time::timeout(deadline, self.run_cycle()).await {
                        Ok(outcome) => tracing::debug!(?outcome, "Monitor cycle finished"),
                        Err(_) => tracing::warn!(?deadline, "Monitor cycle exceeded its deadline"),
                    }
                }
            }
        }
    }

    /// Runs a single cycle, skipped entirely while the gate is busy.
    #[tracing::instrument(skip(self), name = "volume_monitor")]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = self.gate.try_acquire("monitor") else {
            tracing::info!("Another operation is in progress, skipping monitor cycle");
            return CycleOutcome::Busy;
        };

        tracing::info!("Monitoring volumes...");

        let endpoints = match self.cluster.list_metric_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::error!("Failed to list metric endpoints: {e:?}");
                return CycleOutcome::Failed;
            }
        };

        let (pod_configs, pod_ips) = group_endpoints(&endpoints);
        let samples = self.scrape(&pod_ips).await;

        if samples.is_empty() {
            tracing::info!("Metrics data not found");
            return CycleOutcome::NoMetrics;
        }

        let mut stats = CycleStats::default();
        let mut config_cache: HashMap<PodKey, DiskConfig> = HashMap::new();

        for (pod_key, config_names) in &pod_configs {
            let Some(lines) = samples.get(pod_key) else {
                continue;
            };
            let (namespace, pod_name) = pod_key;

            let pod = match self.cluster.get_pod(namespace, pod_name).await {
                Ok(pod) => pod,
                Err(e) => {
                    tracing::error!(pod = %pod_name, namespace = %namespace, "Failed to fetch pod: {e:?}");
                    continue;
                }
            };

            for config_name in config_names {
                let config_key = (namespace.clone(), config_name.clone());
                if !config_cache.contains_key(&config_key) {
                    match self.cluster.get_disk_config(namespace, config_name).await {
                        Ok(config) => {
                            config_cache.insert(config_key.clone(), config);
                        }
                        Err(e) => {
                            tracing::error!(config = %config_name, namespace = %namespace, "Failed to fetch DiskConfig: {e:?}");
                            continue;
                        }
                    }
                }
                let Some(config) = config_cache.get(&config_key) else {
                    continue;
                };

                if config.spec.policy.pause {
                    tracing::info!(config = %config_name, "Autoscaling paused");
                    continue;
                }

                for line in lines {
                    stats.samples += 1;
                    match self.evaluate_sample(&pod, config, line).await {
                        Ok(SampleOutcome::Evaluated(decision)) => {
                            stats.evaluated += 1;
                            if let GrowthDecision::Grow { .. } = decision {
                                stats.resized.push(line_claim(&pod, config));
                            }
                        }
                        Ok(SampleOutcome::ResizeJobCreated { job }) => stats.resize_jobs.push(job),
                        Ok(outcome) => {
                            tracing::debug!(pod = %pod_name, config = %config_name, ?outcome, "Sample skipped");
                        }
                        Err(e) => {
                            tracing::error!(pod = %pod_name, config = %config_name, "Failed to evaluate sample: {e:?}");
                        }
                    }
                }
            }
        }

        tracing::info!(
            samples = stats.samples,
            evaluated = stats.evaluated,
            resized = stats.resized.len(),
            "Monitor cycle done"
        );
        CycleOutcome::Completed(stats)
    }

    /// Fetches free space lines per pod, unreachable pods are skipped.
    async fn scrape(&self, pod_ips: &BTreeMap<PodKey, String>) -> BTreeMap<PodKey, Vec<String>> {
        let mut samples: BTreeMap<PodKey, Vec<String>> = BTreeMap::new();

        for (pod_key, ip) in pod_ips {
            let body = match self.scraper.scrape(ip).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(pod = %pod_key.1, ip = %ip, "Failed to scrape metrics: {e:?}");
                    continue;
                }
            };

            let lines: Vec<String> = body
                .lines()
                .filter(|line| !line.starts_with('#') && line.contains(AVAILABLE_BYTES_METRIC))
                .map(str::to_string)
                .collect();

            if !lines.is_empty() {
                samples.insert(pod_key.clone(), lines);
            }
        }

        samples
    }

    async fn evaluate_sample(
        &self,
        pod: &Pod,
        config: &DiskConfig,
        line: &str,
    ) -> Result<SampleOutcome, Report<MonitorError>> {
        let family = exposition::parse_metric_line(line).change_context(MonitorError::Parse)?;
        if family.name != AVAILABLE_BYTES_METRIC {
            return Ok(SampleOutcome::OtherMountPoint);
        }

        let mount_point = family
            .label("mountpoint")
            .ok_or(MonitorError::MissingLabel { label: "mountpoint" })?;
        if mount_point != config.mount_point(0) {
            return Ok(SampleOutcome::OtherMountPoint);
        }

        let namespace = pod.namespace().unwrap_or_default();
        let claim_name = claim_for_mount_point(pod, mount_point).ok_or_else(|| {
            MonitorError::VolumeNotFound {
                pod: pod.name_any(),
                mount_point: mount_point.to_string(),
            }
        })?;

        let mut claim = self
            .cluster
            .get_claim(&namespace, &claim_name)
            .await
            .change_context(MonitorError::Cluster { operation: "get_claim" })?;

        if !claims::has_finalizer(&claim, &config.finalizer()) {
            tracing::info!(
                claim = %claim_name,
                owner = claims::config_name(&claim).unwrap_or_default(),
                "Claim is not managed by {}",
                config.name_any()
            );
            return Ok(SampleOutcome::Unmanaged);
        }

        if claims::has_condition(&claim, claims::CONDITION_RESIZING) {
            tracing::info!(claim = %claim_name, "Claim is resizing");
            return Ok(SampleOutcome::Resizing);
        }

        if claims::has_condition(&claim, claims::CONDITION_FILE_SYSTEM_RESIZE_PENDING) {
            return self.handle_resize_pending(pod, &claim).await;
        }

        let available = family.value().ok_or(MonitorError::Parse)?;
        let capacity = claim_capacity(&claim)?;
        let maximum = quantity::parse_quantity(&config.spec.policy.maximum_capacity_of_disk)
            .change_context(MonitorError::Quantity {
                field: "policy.maximumCapacityOfDisk",
            })?;

        let evaluation = evaluate(
            available,
            capacity,
            maximum,
            config.spec.policy.upscale_trigger_percentage,
        );

        metrics::emit_volume_metrics(&VolumeMetrics {
            namespace: &namespace,
            pod: &pod.name_any(),
            config: &config.name_any(),
            claim: &claim_name,
            mount_point,
            available_bytes: available,
            capacity_bytes: capacity,
            maximum_bytes: maximum,
            threshold_bytes: evaluation.threshold,
            decision: evaluation.decision.as_str(),
        });

        tracing::info!(
            claim = %claim_name,
            available,
            threshold = evaluation.threshold,
            capacity,
            maximum,
            "Capacities"
        );

        match evaluation.decision {
            GrowthDecision::Sufficient => {
                tracing::info!(claim = %claim_name, "Disk size ok");
            }
            GrowthDecision::CeilingReached => {
                tracing::warn!(
                    claim = %claim_name,
                    maximum,
                    "Maximum capacity reached, volume will not grow further"
                );
            }
            GrowthDecision::Grow { new_capacity } => {
                tracing::info!(claim = %claim_name, from = capacity, to = new_capacity, "Resizing claim");
                claims::set_storage_request(&mut claim, quantity::format_bytes(new_capacity));
                self.cluster
                    .replace_claim(&claim)
                    .await
                    .change_context(MonitorError::Cluster {
                        operation: "replace_claim",
                    })?;
            }
        }

        Ok(SampleOutcome::Evaluated(evaluation.decision))
    }

    /// Creates a resize job when the file system is grown by this system.
    async fn handle_resize_pending(
        &self,
        pod: &Pod,
        claim: &PersistentVolumeClaim,
    ) -> Result<SampleOutcome, Report<MonitorError>> {
        let claim_name = claim.name_any();
        let namespace = claim.namespace().unwrap_or_default();

        let storage_class_name = claim
            .spec
            .as_ref()
            .and_then(|spec| spec.storage_class_name.clone())
            .ok_or_else(|| MonitorError::MissingField {
                claim: claim_name.clone(),
                field: "spec.storageClassName",
            })?;
        let storage_class = self
            .cluster
            .get_storage_class(&storage_class_name)
            .await
            .change_context(MonitorError::Cluster {
                operation: "get_storage_class",
            })?;
        let driver = self
            .drivers
            .get(&storage_class.provisioner)
            .change_context_lazy(|| MonitorError::Driver {
                claim: claim_name.clone(),
            })?;

        if driver.is_file_system_managed() {
            return Ok(SampleOutcome::ResizePending);
        }

        let selector = format!("{CLAIM_LABEL}={claim_name}");
        let existing = self
            .cluster
            .list_jobs(&namespace, &selector)
            .await
            .change_context(MonitorError::Cluster { operation: "list_jobs" })?;
        if existing.iter().any(|job| !is_finished(job)) {
            tracing::info!(claim = %claim_name, "Resize job already running");
            return Ok(SampleOutcome::ResizePending);
        }

        let volume_name = claims::volume_name(claim)
            .ok_or_else(|| MonitorError::MissingField {
                claim: claim_name.clone(),
                field: "spec.volumeName",
            })?
            .to_string();
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .ok_or_else(|| MonitorError::MissingField {
                claim: claim_name.clone(),
                field: "pod spec.nodeName",
            })?;

        let volume = self
            .cluster
            .get_persistent_volume(&volume_name)
            .await
            .change_context(MonitorError::Cluster {
                operation: "get_persistent_volume",
            })?;
        let file_system = volume
            .spec
            .as_ref()
            .and_then(|spec| spec.csi.as_ref())
            .and_then(|csi| csi.fs_type.as_deref())
            .unwrap_or(DEFAULT_FILE_SYSTEM);

        let owner = jobs::claim_owner_reference(claim).change_context_lazy(|| {
            MonitorError::Render {
                claim: claim_name.clone(),
            }
        })?;
        let job = jobs::render_resize_job(
            &ResizeJobParams {
                claim_name: claim_name.clone(),
                volume_name,
                namespace,
                node_name,
                file_system: FileSystem::parse(file_system),
                pre_resize_command: driver.pre_resize_command(),
                volume_attachment_meta: driver.wait_for_volume_attachment_meta(),
            },
            owner,
        )
        .change_context_lazy(|| MonitorError::Render {
            claim: claim_name.clone(),
        })?;

        let created = self
            .cluster
            .create_job(&job)
            .await
            .change_context(MonitorError::Cluster { operation: "create_job" })?;

        tracing::info!(claim = %claim_name, job = %created.name_any(), "Resize job created");
        Ok(SampleOutcome::ResizeJobCreated {
            job: created.name_any(),
        })
    }
}

/// Groups config names and addresses by the pods behind the endpoints.
fn group_endpoints(
    endpoints: &[Endpoints],
) -> (BTreeMap<PodKey, Vec<String>>, BTreeMap<PodKey, String>) {
    let mut pod_configs: BTreeMap<PodKey, Vec<String>> = BTreeMap::new();
    let mut pod_ips = BTreeMap::new();

    for endpoint in endpoints {
        let Some(config_name) = endpoint.labels().get(CONFIG_LABEL) else {
            continue;
        };

        let addresses = endpoint
            .subsets
            .iter()
            .flatten()
            .flat_map(|subset| subset.addresses.iter().flatten());

        for address in addresses {
            let Some(target) = address.target_ref.as_ref() else {
                continue;
            };
            if target.kind.as_deref().is_some_and(|kind| kind != "Pod") {
                continue;
            }
            let Some(pod_name) = target.name.clone() else {
                continue;
            };
            let namespace = target
                .namespace
                .clone()
                .or_else(|| endpoint.namespace())
                .unwrap_or_default();
            let pod_key = (namespace, pod_name);

            let configs = pod_configs.entry(pod_key.clone()).or_default();
            if !configs.contains(config_name) {
                configs.push(config_name.clone());
            }
            pod_ips.insert(pod_key, address.ip.clone());
        }
    }

    (pod_configs, pod_ips)
}

/// Resolves the claim mounted at `mount_point` in any container of the pod.
fn claim_for_mount_point(pod: &Pod, mount_point: &str) -> Option<String> {
    let spec = pod.spec.as_ref()?;

    let volume_name = spec
        .containers
        .iter()
        .flat_map(|container| container.volume_mounts.iter().flatten())
        .find(|mount| mount.mount_path == mount_point)
        .map(|mount| mount.name.as_str())?;

    spec.volumes
        .iter()
        .flatten()
        .find(|volume| volume.name == volume_name)
        .and_then(|volume| volume.persistent_volume_claim.as_ref())
        .map(|source| source.claim_name.clone())
}

fn line_claim(pod: &Pod, config: &DiskConfig) -> String {
    claim_for_mount_point(pod, &config.mount_point(0)).unwrap_or_default()
}

/// Provisioned capacity, falling back to the request before the first bind.
fn claim_capacity(claim: &PersistentVolumeClaim) -> Result<u64, Report<MonitorError>> {
    let capacity = claim
        .status
        .as_ref()
        .and_then(|status| status.capacity.as_ref())
        .and_then(|capacity| capacity.get(claims::STORAGE))
        .or_else(|| claims::storage_request(claim))
        .ok_or_else(|| MonitorError::MissingField {
            claim: claim.name_any(),
            field: "status.capacity",
        })?;

    quantity::parse_quantity(capacity).change_context(MonitorError::Quantity {
        field: "status.capacity",
    })
}

fn is_finished(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| (c.type_ == "Complete" || c.type_ == "Failed") && c.status == "True")
        })
}
