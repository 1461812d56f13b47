//! Storage backend drivers
//!
//! A driver answers the backend specific questions the mutator and the job
//! renderer ask: which storage classes are usable, how an initial claim looks,
//! which shell snippet discovers the block device on the host and whether the
//! backend grows the file system by itself.

use core::error::Error;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use error_stack::Report;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

pub mod ebs;
pub mod gce_pd;
pub mod query;

pub use ebs::EbsDriver;
pub use gce_pd::GcePdDriver;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum DriverError {
    #[display("Unsupported storage provisioner: {provisioner}")]
    Unsupported { provisioner: String },
    #[display("StorageClass {name} is not usable with {provisioner}")]
    InvalidStorageClass { name: String, provisioner: String },
}

impl Error for DriverError {}

/// Facts about one storage backend.
pub trait Driver: Send + Sync {
    /// Provisioner name the driver is registered under.
    fn provisioner(&self) -> &'static str;

    /// Whether claims of the storage class can be attached and grown.
    fn validate_storage_class(&self, storage_class: &StorageClass) -> bool;

    /// Initial claim, without size, labels or finalizers.
    fn pvc_stub(&self, name: &str, namespace: &str, storage_class_name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some(storage_class_name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Namespace of the backend's controller pods.
    fn csi_driver_namespace(&self) -> &'static str;

    /// Labels of the backend's controller pods.
    fn csi_driver_pod_labels(&self) -> BTreeMap<String, String>;

    /// Shell snippet exporting `DEV` before a mount.
    fn pre_mount_command(&self) -> Option<String>;

    /// Shell snippet exporting `DEV` before a resize.
    fn pre_resize_command(&self) -> Option<String> {
        self.pre_mount_command()
    }

    /// `true` when the backend grows the file system itself.
    fn is_file_system_managed(&self) -> bool;

    /// Volume attachment metadata key to wait for before mounting.
    fn wait_for_volume_attachment_meta(&self) -> Option<String>;
}

/// Acceptance rule shared by block backends: delayed binding so the volume is
/// created in the zone of the pod, and expansion enabled.
pub fn requires_delayed_binding_and_expansion(storage_class: &StorageClass) -> bool {
    if storage_class.volume_binding_mode.as_deref() != Some("WaitForFirstConsumer") {
        tracing::warn!(
            storage_class = %storage_class.name_any(),
            "only volumeBindingMode WaitForFirstConsumer is supported"
        );
        return false;
    }

    if storage_class.allow_volume_expansion != Some(true) {
        tracing::warn!(
            storage_class = %storage_class.name_any(),
            "only allowVolumeExpansion true is supported"
        );
        return false;
    }

    true
}

/// Drivers keyed by provisioner name.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<&'static str, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every builtin backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EbsDriver));
        registry.register(Arc::new(GcePdDriver));
        registry
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.provisioner(), driver);
    }

    pub fn get(&self, provisioner: &str) -> Result<Arc<dyn Driver>, Report<DriverError>> {
        self.drivers.get(provisioner).cloned().ok_or_else(|| {
            Report::new(DriverError::Unsupported {
                provisioner: provisioner.to_string(),
            })
        })
    }

    /// Selects the driver of the class provisioner and validates the class.
    pub fn for_storage_class(
        &self,
        storage_class: &StorageClass,
    ) -> Result<Arc<dyn Driver>, Report<DriverError>> {
        let driver = self.get(&storage_class.provisioner)?;

        if !driver.validate_storage_class(storage_class) {
            return Err(Report::new(DriverError::InvalidStorageClass {
                name: storage_class.name_any(),
                provisioner: storage_class.provisioner.clone(),
            }));
        }

        Ok(driver)
    }

    pub fn drivers(&self) -> impl Iterator<Item = &Arc<dyn Driver>> {
        self.drivers.values()
    }
}

#[cfg(test)]
pub(crate) fn storage_class(
    name: &str,
    provisioner: &str,
    binding_mode: Option<&str>,
    expansion: Option<bool>,
) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        provisioner: provisioner.to_string(),
        volume_binding_mode: binding_mode.map(str::to_string),
        allow_volume_expansion: expansion,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn builtin_drivers_are_registered() {
        let registry = DriverRegistry::with_builtin();

        assert!(registry.get("ebs.csi.aws.com").is_ok());
        assert!(registry.get("pd.csi.storage.gke.io").is_ok());
        assert_eq!(registry.drivers().count(), 2);
    }

    #[test]
    fn unknown_provisioner_is_unsupported() {
        let registry = DriverRegistry::with_builtin();

        let err = registry.get("kubernetes.io/no-provisioner").err().unwrap();

        assert_eq!(
            err.current_context(),
            &DriverError::Unsupported {
                provisioner: "kubernetes.io/no-provisioner".to_string()
            }
        );
    }

    #[test]
    fn storage_class_is_validated_on_selection() {
        let registry = DriverRegistry::with_builtin();
        let valid = storage_class("gp3", "ebs.csi.aws.com", Some("WaitForFirstConsumer"), Some(true));
        let immediate = storage_class("gp3", "ebs.csi.aws.com", Some("Immediate"), Some(true));

        assert!(registry.for_storage_class(&valid).is_ok());
        assert!(matches!(
            registry
                .for_storage_class(&immediate)
                .err()
                .unwrap()
                .current_context(),
            DriverError::InvalidStorageClass { .. }
        ));
    }

    #[test]
    fn acceptance_rule_requires_both_settings() {
        let cases = [
            (Some("WaitForFirstConsumer"), Some(true), true),
            (Some("WaitForFirstConsumer"), Some(false), false),
            (Some("WaitForFirstConsumer"), None, false),
            (Some("Immediate"), Some(true), false),
            (None, Some(true), false),
        ];

        for (binding_mode, expansion, expected) in cases {
            let class = storage_class("sc", "ebs.csi.aws.com", binding_mode, expansion);
            assert_eq!(
                requires_delayed_binding_and_expansion(&class),
                expected,
                "binding mode {binding_mode:?}, expansion {expansion:?}"
            );
        }
    }
}
