use api_types::DiskConfig;
use api_types::CONFIG_LABEL;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::ListParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use kube::ResourceExt;

use super::ClusterApi;
use super::ClusterError;

/// [`ClusterApi`] backed by a `kube` client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Maps a `kube` error onto the [`ClusterError`] taxonomy.
fn classify(err: kube::Error, kind: &'static str, name: &str) -> Report<ClusterError> {
    let name = name.to_string();
    let context = match &err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound { kind, name },
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists { kind, name }
        }
        kube::Error::Api(response) if response.code == 409 => ClusterError::Conflict { kind, name },
        other => ClusterError::Api {
            kind,
            name,
            message: other.to_string(),
        },
    };

    Report::new(err).change_context(context)
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_metric_endpoints(&self) -> Result<Vec<Endpoints>, Report<ClusterError>> {
        let api: Api<Endpoints> = Api::all(self.client.clone());
        let endpoints = api
            .list(&ListParams::default().labels(CONFIG_LABEL))
            .await
            .map_err(|e| classify(e, "Endpoints", CONFIG_LABEL))?;

        Ok(endpoints.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| classify(e, "Pod", name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, Report<ClusterError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| classify(e, "Pod", label_selector))?;

        Ok(pods.items)
    }

    async fn get_disk_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DiskConfig, Report<ClusterError>> {
        let api: Api<DiskConfig> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| classify(e, "DiskConfig", name))
    }

    async fn list_disk_configs(
        &self,
        namespace: &str,
    ) -> Result<Vec<DiskConfig>, Report<ClusterError>> {
        let api: Api<DiskConfig> = Api::namespaced(self.client.clone(), namespace);
        let configs = api
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, "DiskConfig", namespace))?;

        Ok(configs.items)
    }

    async fn replace_disk_config_status(
        &self,
        config: &DiskConfig,
    ) -> Result<DiskConfig, Report<ClusterError>> {
        let name = config.name_any();
        let namespace = config.namespace().unwrap_or_default();
        let api: Api<DiskConfig> = Api::namespaced(self.client.clone(), &namespace);

        let body = serde_json::to_vec(config).change_context(ClusterError::Api {
            kind: "DiskConfig",
            name: name.clone(),
            message: "unable to serialize status".to_string(),
        })?;

        api.replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| classify(e, "DiskConfig", &name))
    }

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| classify(e, "PersistentVolumeClaim", name))
    }

    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>> {
        let namespace = claim.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), claim)
            .await
            .map_err(|e| classify(e, "PersistentVolumeClaim", &claim.name_any()))
    }

    async fn replace_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>> {
        let name = claim.name_any();
        let namespace = claim.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), claim)
            .await
            .map_err(|e| classify(e, "PersistentVolumeClaim", &name))
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, Report<ClusterError>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| classify(e, "StorageClass", name))
    }

    async fn get_persistent_volume(
        &self,
        name: &str,
    ) -> Result<PersistentVolume, Report<ClusterError>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| classify(e, "PersistentVolume", name))
    }

    async fn list_jobs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Job>, Report<ClusterError>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let jobs = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| classify(e, "Job", label_selector))?;

        Ok(jobs.items)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, Report<ClusterError>> {
        let namespace = job.namespace().unwrap_or_default();
        let api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), job)
            .await
            .map_err(|e| classify(e, "Job", &job.name_any()))
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn not_found_is_classified() {
        let report = classify(api_error(404, "NotFound"), "Pod", "web-0");
        assert!(report.current_context().is_not_found());
    }

    #[test]
    fn already_exists_and_conflict_are_distinguished() {
        let exists = classify(api_error(409, "AlreadyExists"), "PersistentVolumeClaim", "a");
        let conflict = classify(api_error(409, "Conflict"), "DiskConfig", "b");

        assert!(exists.current_context().is_already_exists());
        assert!(conflict.current_context().is_conflict());
    }

    #[test]
    fn other_errors_are_transient_api_failures() {
        let report = classify(api_error(500, "InternalError"), "Job", "j");

        assert!(matches!(
            report.current_context(),
            ClusterError::Api { kind: "Job", .. }
        ));
    }
}
