//! In-memory [`ClusterApi`] used by the unit tests.
//!
//! Objects are stored by `namespace/name`. Every write bumps a global resource
//! version and replacing an object with a stale version fails with
//! [`ClusterError::Conflict`], like the API server does.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Mutex;

use api_types::DiskConfig;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::Resource;
use kube::ResourceExt;

use super::ClusterApi;
use super::ClusterError;

#[derive(Default)]
struct State {
    revision: u64,
    endpoints: Vec<Endpoints>,
    pods: BTreeMap<String, Pod>,
    configs: BTreeMap<String, DiskConfig>,
    claims: BTreeMap<String, PersistentVolumeClaim>,
    storage_classes: BTreeMap<String, StorageClass>,
    volumes: BTreeMap<String, PersistentVolume>,
    jobs: BTreeMap<String, Job>,
    failing: HashSet<&'static str>,
    racing: HashSet<&'static str>,
    calls: Vec<String>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn check(&mut self, operation: &'static str, name: &str) -> Result<(), Report<ClusterError>> {
        self.calls.push(format!("{operation} {name}"));
        if self.failing.contains(operation) {
            return Err(Report::new(ClusterError::Api {
                kind: operation,
                name: name.to_string(),
                message: "injected failure".to_string(),
            }));
        }
        Ok(())
    }

    /// Whether a concurrent writer sneaks in after this read of `operation`.
    fn raced(&mut self, operation: &'static str) -> bool {
        self.racing.remove(operation)
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn object_key<K: Resource>(object: &K) -> String {
    key(&object.namespace().unwrap_or_default(), &object.name_any())
}

fn not_found(kind: &'static str, name: &str) -> Report<ClusterError> {
    Report::new(ClusterError::NotFound {
        kind,
        name: name.to_string(),
    })
}

/// Matches `key=value` and bare `key` terms joined by commas.
fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).is_some_and(|value| value == v.trim()),
            None => labels.contains_key(term),
        })
}

#[derive(Default)]
pub struct MockCluster {
    state: Mutex<State>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of `operation` fail with a transient API error.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    /// After the next successful `operation` read, another writer updates the
    /// object so that writing back what was read fails with a conflict.
    pub fn race_after(&self, operation: &'static str) {
        self.state.lock().unwrap().racing.insert(operation);
    }

    /// Calls made so far, as `<operation> <name>`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn add_endpoints(&self, endpoints: Endpoints) {
        self.state.lock().unwrap().endpoints.push(endpoints);
    }

    pub fn add_pod(&self, pod: Pod) {
        let mut state = self.state.lock().unwrap();
        state.pods.insert(object_key(&pod), pod);
    }

    pub fn add_disk_config(&self, mut config: DiskConfig) {
        let mut state = self.state.lock().unwrap();
        config.metadata.resource_version = Some(state.next_version());
        state.configs.insert(object_key(&config), config);
    }

    pub fn add_claim(&self, mut claim: PersistentVolumeClaim) {
        let mut state = self.state.lock().unwrap();
        claim.metadata.resource_version = Some(state.next_version());
        state.claims.insert(object_key(&claim), claim);
    }

    pub fn add_storage_class(&self, storage_class: StorageClass) {
        let mut state = self.state.lock().unwrap();
        state
            .storage_classes
            .insert(storage_class.name_any(), storage_class);
    }

    pub fn add_persistent_volume(&self, volume: PersistentVolume) {
        let mut state = self.state.lock().unwrap();
        state.volumes.insert(volume.name_any(), volume);
    }

    pub fn add_job(&self, job: Job) {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(object_key(&job), job);
    }

    pub fn disk_config(&self, namespace: &str, name: &str) -> Option<DiskConfig> {
        self.state
            .lock()
            .unwrap()
            .configs
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state
            .lock()
            .unwrap()
            .claims
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn claims(&self) -> Vec<PersistentVolumeClaim> {
        self.state.lock().unwrap().claims.values().cloned().collect()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.values().cloned().collect()
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_metric_endpoints(&self) -> Result<Vec<Endpoints>, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("list_metric_endpoints", "")?;
        Ok(state.endpoints.clone())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("get_pod", name)?;
        state
            .pods
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Pod", name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("list_pods", label_selector)?;
        Ok(state
            .pods
            .values()
            .filter(|pod| pod.namespace().as_deref() == Some(namespace))
            .filter(|pod| matches_selector(pod.labels(), label_selector))
            .cloned()
            .collect())
    }

    async fn get_disk_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DiskConfig, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("get_disk_config", name)?;
        let config = state
            .configs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("DiskConfig", name))?;

        if state.raced("get_disk_config") {
            let version = state.next_version();
            if let Some(stored) = state.configs.get_mut(&key(namespace, name)) {
                stored.metadata.resource_version = Some(version);
            }
        }
        Ok(config)
    }

    async fn list_disk_configs(
        &self,
        namespace: &str,
    ) -> Result<Vec<DiskConfig>, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("list_disk_configs", namespace)?;
        Ok(state
            .configs
            .values()
            .filter(|config| config.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn replace_disk_config_status(
        &self,
        config: &DiskConfig,
    ) -> Result<DiskConfig, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        let name = config.name_any();
        state.check("replace_disk_config_status", &name)?;

        let object_key = object_key(config);
        let Some(current) = state.configs.get(&object_key) else {
            return Err(not_found("DiskConfig", &name));
        };
        if current.metadata.resource_version != config.metadata.resource_version {
            return Err(Report::new(ClusterError::Conflict {
                kind: "DiskConfig",
                name,
            }));
        }

        let mut updated = current.clone();
        updated.status = config.status.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.configs.insert(object_key, updated.clone());
        Ok(updated)
    }

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("get_claim", name)?;
        let claim = state
            .claims
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("PersistentVolumeClaim", name))?;

        if state.raced("get_claim") {
            let version = state.next_version();
            if let Some(stored) = state.claims.get_mut(&key(namespace, name)) {
                stored.metadata.resource_version = Some(version);
            }
        }
        Ok(claim)
    }

    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        let name = claim.name_any();
        state.check("create_claim", &name)?;

        let object_key = object_key(claim);
        if state.claims.contains_key(&object_key) {
            return Err(Report::new(ClusterError::AlreadyExists {
                kind: "PersistentVolumeClaim",
                name,
            }));
        }

        let mut created = claim.clone();
        created.metadata.resource_version = Some(state.next_version());
        state.claims.insert(object_key, created.clone());
        Ok(created)
    }

    async fn replace_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        let name = claim.name_any();
        state.check("replace_claim", &name)?;

        let object_key = object_key(claim);
        let Some(current) = state.claims.get(&object_key) else {
            return Err(not_found("PersistentVolumeClaim", &name));
        };
        if current.metadata.resource_version != claim.metadata.resource_version {
            return Err(Report::new(ClusterError::Conflict {
                kind: "PersistentVolumeClaim",
                name,
            }));
        }

        let mut updated = claim.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.claims.insert(object_key, updated.clone());
        Ok(updated)
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("get_storage_class", name)?;
        state
            .storage_classes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("StorageClass", name))
    }

    async fn get_persistent_volume(
        &self,
        name: &str,
    ) -> Result<PersistentVolume, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("get_persistent_volume", name)?;
        state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("PersistentVolume", name))
    }

    async fn list_jobs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Job>, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.check("list_jobs", label_selector)?;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.namespace().as_deref() == Some(namespace))
            .filter(|job| matches_selector(job.labels(), label_selector))
            .cloned()
            .collect())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        let name = job.name_any();
        state.check("create_job", &name)?;

        let object_key = object_key(job);
        if state.jobs.contains_key(&object_key) {
            return Err(Report::new(ClusterError::AlreadyExists { kind: "Job", name }));
        }
        state.jobs.insert(object_key, job.clone());
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matching() {
        let labels = BTreeMap::from([
            ("app".to_string(), "blockscaler".to_string()),
            ("blockscaler.io/claim".to_string(), "data".to_string()),
        ]);

        assert!(matches_selector(&labels, ""));
        assert!(matches_selector(&labels, "app=blockscaler"));
        assert!(matches_selector(&labels, "app=blockscaler,blockscaler.io/claim=data"));
        assert!(matches_selector(&labels, "blockscaler.io/claim"));
        assert!(!matches_selector(&labels, "app=other"));
        assert!(!matches_selector(&labels, "tier"));
    }

    #[tokio::test]
    async fn stale_claim_replace_conflicts() {
        let cluster = MockCluster::new();
        let mut claim = PersistentVolumeClaim::default();
        claim.metadata.name = Some("data".to_string());
        claim.metadata.namespace = Some("default".to_string());
        cluster.add_claim(claim);

        let first = cluster.get_claim("default", "data").await.unwrap();
        let stale = first.clone();
        cluster.replace_claim(&first).await.unwrap();

        let err = cluster.replace_claim(&stale).await.unwrap_err();
        assert!(err.current_context().is_conflict());
    }
}
