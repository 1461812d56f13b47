use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;

use super::requires_delayed_binding_and_expansion;
use super::Driver;

pub const PROVISIONER: &str = "pd.csi.storage.gke.io";

/// Google Compute Engine persistent disks.
pub struct GcePdDriver;

impl Driver for GcePdDriver {
    fn provisioner(&self) -> &'static str {
        PROVISIONER
    }

    fn validate_storage_class(&self, storage_class: &StorageClass) -> bool {
        requires_delayed_binding_and_expansion(storage_class)
    }

    fn csi_driver_namespace(&self) -> &'static str {
        "gce-pd-csi-driver"
    }

    fn csi_driver_pod_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            "app".to_string(),
            "gcp-compute-persistent-disk-csi-driver".to_string(),
        )])
    }

    fn pre_mount_command(&self) -> Option<String> {
        Some("DEV=$(chroot /host readlink -f /dev/disk/by-id/google-${PV_NAME})".to_string())
    }

    fn is_file_system_managed(&self) -> bool {
        false
    }

    fn wait_for_volume_attachment_meta(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::storage_class;

    #[test]
    fn device_is_resolved_by_disk_id() {
        let command = GcePdDriver.pre_mount_command().unwrap();

        assert!(command.contains("/dev/disk/by-id/google-${PV_NAME}"));
        assert!(command.starts_with("DEV="));
    }

    #[test]
    fn accepts_delayed_binding_with_expansion() {
        let class = storage_class(
            "standard-rwo",
            PROVISIONER,
            Some("WaitForFirstConsumer"),
            Some(true),
        );

        assert!(GcePdDriver.validate_storage_class(&class));
        assert!(GcePdDriver.wait_for_volume_attachment_meta().is_none());
    }
}
