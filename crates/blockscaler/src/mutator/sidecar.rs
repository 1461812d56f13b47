//! Metrics sidecar injected next to the workload containers.

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;

use super::MutationError;

pub const SIDECAR_NAME: &str = "blockscaler-metrics";

const SIDECAR_TEMPLATE: &str = r#"
name: blockscaler-metrics
image: bitnami/node-exporter:1.4.0
ports:
- containerPort: 9100
  protocol: TCP
command:
- /opt/bitnami/node-exporter/bin/node_exporter
- --collector.disable-defaults
- --collector.filesystem
- --collector.filesystem.mount-points-exclude="*"
- --collector.filesystem.fs-types-exclude="^(ext[2-4]|btrfs|xfs)$"
securityContext:
  privileged: false
"#;

/// Node exporter reporting the file systems of the pod.
pub fn render_metrics_sidecar() -> Result<Container, Report<MutationError>> {
    serde_yaml::from_str(SIDECAR_TEMPLATE).change_context(MutationError::SidecarTemplate)
}
