//! Kubernetes integration module.
//!
//! Every component reaches the API server through the [`ClusterApi`] trait so
//! that the control loops can be exercised against an in-memory cluster.
//!
//! The main components are:
//! - [`ClusterApi`]: the typed operations the control loops need
//! - [`KubeCluster`]: the `kube` backed implementation
//! - [`ClusterError`]: the error taxonomy the loops branch on

use core::error::Error;

use api_types::DiskConfig;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::storage::v1::StorageClass;

pub mod claims;
pub mod cluster;
#[cfg(test)]
pub mod mock;

pub use cluster::KubeCluster;

/// Errors that can occur while connecting to or watching the cluster.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to watch {kind}: {message}")]
    WatchFailed { kind: &'static str, message: String },
}

impl Error for KubernetesError {}

/// Outcome classes of a single API call.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ClusterError {
    #[display("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[display("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },
    #[display("{kind} was modified concurrently: {name}")]
    Conflict { kind: &'static str, name: String },
    #[display("API request on {kind} {name} failed: {message}")]
    Api {
        kind: &'static str,
        name: String,
        message: String,
    },
}

impl Error for ClusterError {}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Typed cluster operations used by the monitor, the reconciler and the mutator.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Lists metric endpoints in every namespace carrying the config label.
    async fn list_metric_endpoints(&self) -> Result<Vec<Endpoints>, Report<ClusterError>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>>;

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, Report<ClusterError>>;

    async fn get_disk_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DiskConfig, Report<ClusterError>>;

    async fn list_disk_configs(
        &self,
        namespace: &str,
    ) -> Result<Vec<DiskConfig>, Report<ClusterError>>;

    /// Writes the status subresource, rejected when the resource version is stale.
    async fn replace_disk_config_status(
        &self,
        config: &DiskConfig,
    ) -> Result<DiskConfig, Report<ClusterError>>;

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>>;

    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>>;

    /// Replaces the claim, rejected when the resource version is stale.
    async fn replace_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Report<ClusterError>>;

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass, Report<ClusterError>>;

    async fn get_persistent_volume(
        &self,
        name: &str,
    ) -> Result<PersistentVolume, Report<ClusterError>>;

    async fn list_jobs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Job>, Report<ClusterError>>;

    async fn create_job(&self, job: &Job) -> Result<Job, Report<ClusterError>>;
}
