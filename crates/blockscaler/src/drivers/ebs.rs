use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;

use super::requires_delayed_binding_and_expansion;
use super::Driver;

pub const PROVISIONER: &str = "ebs.csi.aws.com";

/// AWS Elastic Block Store through the EBS CSI driver.
pub struct EbsDriver;

impl Driver for EbsDriver {
    fn provisioner(&self) -> &'static str {
        PROVISIONER
    }

    fn validate_storage_class(&self, storage_class: &StorageClass) -> bool {
        requires_delayed_binding_and_expansion(storage_class)
    }

    fn csi_driver_namespace(&self) -> &'static str {
        "kube-system"
    }

    fn csi_driver_pod_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), "ebs-csi-controller".to_string())])
    }

    // The device is found through the global mount of the persistent volume.
    fn pre_mount_command(&self) -> Option<String> {
        Some(
            "DEV=$(chroot /host nsenter --target 1 --mount mount | grep ${PV_NAME} | awk '{print $1}')"
                .to_string(),
        )
    }

    fn is_file_system_managed(&self) -> bool {
        false
    }

    fn wait_for_volume_attachment_meta(&self) -> Option<String> {
        Some("devicePath".to_string())
    }
}
