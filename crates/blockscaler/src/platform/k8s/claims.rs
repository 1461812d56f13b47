//! Accessors over `PersistentVolumeClaim` fields the control loops read.

use std::collections::BTreeMap;

use api_types::CONFIG_LABEL;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

/// Resource name of the requested size.
pub const STORAGE: &str = "storage";

/// Condition reported while the backend expands the volume.
pub const CONDITION_RESIZING: &str = "Resizing";

/// Condition reported once the volume grew but the file system did not.
pub const CONDITION_FILE_SYSTEM_RESIZE_PENDING: &str = "FileSystemResizePending";

/// Config that owns the claim, taken from the config label.
pub fn config_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.labels().get(CONFIG_LABEL).map(String::as_str)
}

pub fn has_finalizer(claim: &PersistentVolumeClaim, finalizer: &str) -> bool {
    claim.finalizers().iter().any(|f| f == finalizer)
}

/// Removes the finalizer, returns whether it was present.
pub fn remove_finalizer(claim: &mut PersistentVolumeClaim, finalizer: &str) -> bool {
    let finalizers = claim.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

pub fn is_deleting(claim: &PersistentVolumeClaim) -> bool {
    claim.metadata.deletion_timestamp.is_some()
}

/// Phase reported by the platform, `Pending` until a status exists.
pub fn phase(claim: &PersistentVolumeClaim) -> String {
    claim
        .status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Pending".to_string())
}

pub fn has_condition(claim: &PersistentVolumeClaim, condition_type: &str) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == condition_type))
}

/// Requested storage size of the claim.
pub fn storage_request(claim: &PersistentVolumeClaim) -> Option<&Quantity> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get(STORAGE))
}

/// Replaces the requested storage size in place.
pub fn set_storage_request(claim: &mut PersistentVolumeClaim, size: Quantity) {
    let spec = claim.spec.get_or_insert_with(Default::default);
    let resources = spec.resources.get_or_insert_with(Default::default);
    resources
        .requests
        .get_or_insert_with(BTreeMap::new)
        .insert(STORAGE.to_string(), size);
}

/// Name of the bound persistent volume.
pub fn volume_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.volume_name.as_deref())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PersistentVolumeClaimCondition;
    use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn finalizers_are_added_and_removed() {
        let mut claim = PersistentVolumeClaim::default();
        claim
            .finalizers_mut()
            .push("blockscaler.io/logs".to_string());

        assert!(has_finalizer(&claim, "blockscaler.io/logs"));
        assert!(remove_finalizer(&mut claim, "blockscaler.io/logs"));
        assert!(!remove_finalizer(&mut claim, "blockscaler.io/logs"));
        assert!(!has_finalizer(&claim, "blockscaler.io/logs"));
    }

    #[test]
    fn storage_request_is_written_and_read() {
        let mut claim = PersistentVolumeClaim::default();
        assert!(storage_request(&claim).is_none());

        set_storage_request(&mut claim, Quantity("2Gi".to_string()));

        assert_eq!(storage_request(&claim), Some(&Quantity("2Gi".to_string())));
    }

    #[test]
    fn phase_defaults_to_pending() {
        let mut claim = PersistentVolumeClaim::default();
        assert_eq!(phase(&claim), "Pending");

        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            conditions: Some(vec![PersistentVolumeClaimCondition {
                type_: CONDITION_RESIZING.to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });

        assert_eq!(phase(&claim), "Bound");
        assert!(has_condition(&claim, CONDITION_RESIZING));
        assert!(!has_condition(&claim, CONDITION_FILE_SYSTEM_RESIZE_PENDING));
    }
}
