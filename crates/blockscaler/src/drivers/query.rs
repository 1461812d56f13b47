//! Text answers to driver queries, as printed by `blockscaler driver`.

use core::error::Error;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::storage::v1::StorageClass;

use super::Driver;

/// The questions a driver answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "verbatim")]
pub enum DriverQuery {
    IsStorageClassValid,
    GetPVCStub,
    GetCSIDriverNamespace,
    GetCSIDriverPodLabels,
    GetPreMountCommand,
    GetPreResizeCommand,
    IsFileSystemManaged,
    WaitForVolumeAttachmentMeta,
}

/// Environment provided inputs of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryInputs {
    pub storage_class_json: Option<String>,
    pub pvc_name: String,
    pub pvc_namespace: String,
    pub storage_class_name: String,
}

#[derive(Debug, derive_more::Display)]
pub enum QueryError {
    #[display("STORAGE_CLASS_JSON is required for {query:?}")]
    MissingStorageClass { query: DriverQuery },
    #[display("STORAGE_CLASS_JSON is not a valid StorageClass")]
    InvalidStorageClass,
    #[display("Failed to serialize answer of {query:?}")]
    Serialize { query: DriverQuery },
}

impl Error for QueryError {}

/// Answers a query with a single text or JSON value.
pub fn answer(
    driver: &dyn Driver,
    query: DriverQuery,
    inputs: &QueryInputs,
) -> Result<String, Report<QueryError>> {
    let answer = match query {
        DriverQuery::IsStorageClassValid => {
            let raw = inputs
                .storage_class_json
                .as_deref()
                .ok_or(QueryError::MissingStorageClass { query })?;
            let storage_class: StorageClass =
                serde_json::from_str(raw).change_context(QueryError::InvalidStorageClass)?;
            driver.validate_storage_class(&storage_class).to_string()
        }
        DriverQuery::GetPVCStub => {
            let stub = driver.pvc_stub(
                &inputs.pvc_name,
                &inputs.pvc_namespace,
                &inputs.storage_class_name,
            );
            serde_json::to_string(&stub).change_context(QueryError::Serialize { query })?
        }
        DriverQuery::GetCSIDriverNamespace => driver.csi_driver_namespace().to_string(),
        DriverQuery::GetCSIDriverPodLabels => serde_json::to_string(&driver.csi_driver_pod_labels())
            .change_context(QueryError::Serialize { query })?,
        DriverQuery::GetPreMountCommand => driver.pre_mount_command().unwrap_or_default(),
        DriverQuery::GetPreResizeCommand => driver.pre_resize_command().unwrap_or_default(),
        DriverQuery::IsFileSystemManaged => driver.is_file_system_managed().to_string(),
        DriverQuery::WaitForVolumeAttachmentMeta => {
            driver.wait_for_volume_attachment_meta().unwrap_or_default()
        }
    };

    Ok(answer)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::drivers::EbsDriver;

    fn inputs(storage_class_json: Option<&str>) -> QueryInputs {
        QueryInputs {
            storage_class_json: storage_class_json.map(str::to_string),
            pvc_name: "data".to_string(),
            pvc_namespace: "default".to_string(),
            storage_class_name: "gp3".to_string(),
        }
    }

    #[test]
    fn validates_storage_class_json() {
        let valid = r#"{"metadata":{"name":"gp3"},"provisioner":"ebs.csi.aws.com","volumeBindingMode":"WaitForFirstConsumer","allowVolumeExpansion":true}"#;
        let immediate = r#"{"metadata":{"name":"gp3"},"provisioner":"ebs.csi.aws.com","volumeBindingMode":"Immediate","allowVolumeExpansion":true}"#;

        assert_eq!(
            answer(&EbsDriver, DriverQuery::IsStorageClassValid, &inputs(Some(valid))).unwrap(),
            "true"
        );
        assert_eq!(
            answer(&EbsDriver, DriverQuery::IsStorageClassValid, &inputs(Some(immediate))).unwrap(),
            "false"
        );
    }

    #[test]
    fn storage_class_query_requires_input() {
        let missing = answer(&EbsDriver, DriverQuery::IsStorageClassValid, &inputs(None));
        let garbage = answer(&EbsDriver, DriverQuery::IsStorageClassValid, &inputs(Some("{")));

        assert!(matches!(
            missing.unwrap_err().current_context(),
            QueryError::MissingStorageClass { .. }
        ));
        assert!(matches!(
            garbage.unwrap_err().current_context(),
            QueryError::InvalidStorageClass
        ));
    }

    #[test]
    fn stub_is_json() {
        let raw = answer(&EbsDriver, DriverQuery::GetPVCStub, &inputs(None)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["metadata"]["name"], "data");
        assert_eq!(value["metadata"]["namespace"], "default");
        assert_eq!(value["spec"]["storageClassName"], "gp3");
    }

    #[test]
    fn scalar_answers() {
        let inputs = inputs(None);

        assert_eq!(
            answer(&EbsDriver, DriverQuery::GetCSIDriverNamespace, &inputs).unwrap(),
            "kube-system"
        );
        assert_eq!(
            answer(&EbsDriver, DriverQuery::GetCSIDriverPodLabels, &inputs).unwrap(),
            r#"{"app":"ebs-csi-controller"}"#
        );
        assert_eq!(
            answer(&EbsDriver, DriverQuery::IsFileSystemManaged, &inputs).unwrap(),
            "false"
        );
        assert_eq!(
            answer(&EbsDriver, DriverQuery::WaitForVolumeAttachmentMeta, &inputs).unwrap(),
            "devicePath"
        );
    }
}
