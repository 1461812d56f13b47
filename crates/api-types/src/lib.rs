//! Shared API type definitions
//!
//! This crate contains the `DiskConfig` custom resource and the naming
//! conventions (labels, finalizers, mount points) that tie claims, pods and
//! metric endpoints back to the configuration that created them.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// API group of every resource and label owned by blockscaler.
pub const GROUP: &str = "blockscaler.io";

/// Label put on claims and metric endpoints, value is the owning config name.
pub const CONFIG_LABEL: &str = "blockscaler.io/config";

/// Label put on mutated pods so the metrics service can select them.
pub const METRICS_LABEL: &str = "blockscaler.io/metrics";

/// Label put on host jobs, value is the claim the job works on.
pub const CLAIM_LABEL: &str = "blockscaler.io/claim";

/// Placeholder replaced by the volume index in mount point patterns.
pub const MOUNT_POINT_INDEX_PLACEHOLDER: &str = "%d";

/// Returns the finalizer a config puts on every claim it manages.
pub fn finalizer_name(config_name: &str) -> String {
    format!("{GROUP}/{config_name}")
}

/// Renders the mount point of the `index`-th volume of a pattern.
///
/// `%d` is replaced by the index. A pattern without the placeholder is used
/// verbatim for the first volume and gets a `-<index>` suffix for the others.
pub fn render_mount_point(pattern: &str, index: usize) -> String {
    if pattern.contains(MOUNT_POINT_INDEX_PLACEHOLDER) {
        return pattern.replace(MOUNT_POINT_INDEX_PLACEHOLDER, &index.to_string());
    }

    if index == 0 {
        return pattern.to_string();
    }

    format!("{pattern}-{index}")
}

/// Autoscaling policy of a [`DiskConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Stops autoscaling of every claim of the config
    #[serde(default)]
    pub pause: bool,
    /// Upper bound of a single claim
    pub maximum_capacity_of_disk: Quantity,
    /// Percentage of the capacity used as growth threshold
    pub upscale_trigger_percentage: u8,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            pause: false,
            maximum_capacity_of_disk: Quantity("1000Gi".to_string()),
            upscale_trigger_percentage: 80,
        }
    }
}

/// Desired state of a class of autoscaled volumes
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "blockscaler.io",
    version = "v1",
    kind = "DiskConfig",
    namespaced,
    status = "DiskConfigStatus",
    shortname = "dc"
)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfigSpec {
    /// Labels a pod must carry to get a volume of this config
    #[serde(default)]
    pub pod_selector: BTreeMap<String, String>,
    /// Storage class of the claims
    pub storage_class_name: String,
    /// Initial capacity of the claims
    pub capacity: Quantity,
    /// Mount point of the volumes, `%d` is replaced by the volume index
    #[serde(default)]
    pub mount_point_pattern: String,
    /// Access modes of the claims, `ReadWriteOnce` when empty
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub policy: Policy,
}

/// Observed state of a [`DiskConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfigStatus {
    /// Last observed phase of every managed claim
    #[serde(default)]
    pub persistent_volume_claims: BTreeMap<String, String>,
}

impl DiskConfig {
    /// Finalizer of the claims managed by this config.
    pub fn finalizer(&self) -> String {
        finalizer_name(&self.name_any())
    }

    /// Mount point pattern, falling back to `/media/blockscaler/<name>-%d`.
    pub fn mount_point_pattern(&self) -> String {
        if self.spec.mount_point_pattern.is_empty() {
            return format!(
                "/media/blockscaler/{}-{MOUNT_POINT_INDEX_PLACEHOLDER}",
                self.name_any()
            );
        }

        self.spec.mount_point_pattern.clone()
    }

    /// Mount point of the `index`-th volume of this config.
    pub fn mount_point(&self, index: usize) -> String {
        render_mount_point(&self.mount_point_pattern(), index)
    }

    /// Whether every selector label is present on the pod with the same value.
    pub fn selects(&self, pod_labels: &BTreeMap<String, String>) -> bool {
        self.spec
            .pod_selector
            .iter()
            .all(|(key, value)| pod_labels.get(key) == Some(value))
    }

    /// Whether the config is being deleted.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
