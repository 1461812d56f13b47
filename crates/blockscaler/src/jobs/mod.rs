//! Host job rendering
//!
//! Three job shapes exist. The attach job forces the volume onto a node, the
//! mount job exposes the device inside running containers and the resize job
//! grows the file system once the backend expanded the volume.

use core::error::Error;
use std::collections::BTreeMap;

use api_types::CLAIM_LABEL;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Affinity;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::NodeAffinity;
use k8s_openapi::api::core::v1::NodeSelector;
use k8s_openapi::api::core::v1::NodeSelectorRequirement;
use k8s_openapi::api::core::v1::NodeSelectorTerm;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use utils::naming::render_resource_name;

pub mod pipeline;
pub mod templates;

pub use pipeline::CommandPipeline;
pub use pipeline::FileSystem;
pub use pipeline::MountStrategy;

#[derive(Debug, derive_more::Display)]
pub enum RenderError {
    #[display("Job skeleton {template} is invalid")]
    Template { template: &'static str },
    #[display("Job skeleton {template} has no {field}")]
    Skeleton {
        template: &'static str,
        field: &'static str,
    },
    #[display("Claim {claim} cannot own a job: {reason}")]
    Owner { claim: String, reason: &'static str },
}

impl Error for RenderError {}

/// Parameters of a mount job.
#[derive(Debug, Clone)]
pub struct MountJobParams {
    pub claim_name: String,
    pub volume_name: String,
    pub namespace: String,
    pub node_name: String,
    pub file_system: FileSystem,
    pub mount_point: String,
    pub container_ids: Vec<String>,
    pub pre_mount_command: Option<String>,
    pub host_pid: bool,
    pub volume_attachment_meta: Option<String>,
}

/// Parameters of a resize job.
#[derive(Debug, Clone)]
pub struct ResizeJobParams {
    pub claim_name: String,
    pub volume_name: String,
    pub namespace: String,
    pub node_name: String,
    pub file_system: FileSystem,
    pub pre_resize_command: Option<String>,
    pub volume_attachment_meta: Option<String>,
}

/// Owner reference making the claim garbage collect the job.
pub fn claim_owner_reference(
    claim: &PersistentVolumeClaim,
) -> Result<OwnerReference, Report<RenderError>> {
    let name = claim.meta().name.clone().unwrap_or_default();
    let uid = claim.meta().uid.clone().ok_or_else(|| RenderError::Owner {
        claim: name.clone(),
        reason: "claim has no uid",
    })?;

    Ok(OwnerReference {
        api_version: PersistentVolumeClaim::api_version(&()).to_string(),
        kind: PersistentVolumeClaim::kind(&()).to_string(),
        name,
        uid,
        ..Default::default()
    })
}

/// Job name unique per trigger, correlated with the claim.
pub fn render_job_name(claim_name: &str, namespace: &str) -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(crate::metrics::current_time);
    render_resource_name(&nanos.to_string(), claim_name, namespace)
}

/// Read only listing of the claim mount on the node, binding the volume there.
pub fn render_attach_job(
    claim_name: &str,
    namespace: &str,
    node_name: &str,
    owner: OwnerReference,
) -> Result<Job, Report<RenderError>> {
    let mut job = skeleton("attach", templates::ATTACH_JOB)?;
    set_metadata(&mut job, claim_name, namespace, owner);

    let pod_spec = pod_spec_mut(&mut job, "attach")?;
    pod_spec.affinity = Some(node_affinity(node_name));
    pod_spec.volumes = Some(vec![Volume {
        name: "attach".to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }]);

    Ok(job)
}

/// Privileged job mounting the device of the claim into the given containers.
pub fn render_mount_job(
    params: &MountJobParams,
    owner: OwnerReference,
) -> Result<Job, Report<RenderError>> {
    let script = pipeline::mount_script(
        params.pre_mount_command.as_deref(),
        MountStrategy::for_host_pid(params.host_pid),
    );

    let env = host_env(HostEnv {
        mount_point: &params.mount_point,
        container_ids: &params.container_ids.join(" "),
        claim_name: &params.claim_name,
        volume_name: &params.volume_name,
        node_name: &params.node_name,
        file_system: &params.file_system,
        volume_attachment_meta: params.volume_attachment_meta.as_deref(),
    });

    render_host_job(
        "mount",
        &params.claim_name,
        &params.namespace,
        &params.node_name,
        env,
        script,
        owner,
    )
}

/// Privileged job growing the file system of the claim.
pub fn render_resize_job(
    params: &ResizeJobParams,
    owner: OwnerReference,
) -> Result<Job, Report<RenderError>> {
    let script = pipeline::resize_script(params.pre_resize_command.as_deref(), &params.file_system);

    let env = host_env(HostEnv {
        mount_point: "",
        container_ids: "",
        claim_name: &params.claim_name,
        volume_name: &params.volume_name,
        node_name: &params.node_name,
        file_system: &params.file_system,
        volume_attachment_meta: params.volume_attachment_meta.as_deref(),
    });

    render_host_job(
        "resize",
        &params.claim_name,
        &params.namespace,
        &params.node_name,
        env,
        script,
        owner,
    )
}

struct HostEnv<'a> {
    mount_point: &'a str,
    container_ids: &'a str,
    claim_name: &'a str,
    volume_name: &'a str,
    node_name: &'a str,
    file_system: &'a FileSystem,
    volume_attachment_meta: Option<&'a str>,
}

fn host_env(env: HostEnv<'_>) -> Vec<EnvVar> {
    [
        ("MOUNT_POINT", env.mount_point),
        ("CONTAINER_IDS", env.container_ids),
        ("PVC_NAME", env.claim_name),
        ("PV_NAME", env.volume_name),
        ("NODE_NAME", env.node_name),
        ("FS", env.file_system.as_str()),
        ("VOLUME_ATTACHMENT_META", env.volume_attachment_meta.unwrap_or_default()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    })
    .collect()
}

fn render_host_job(
    template: &'static str,
    claim_name: &str,
    namespace: &str,
    node_name: &str,
    env: Vec<EnvVar>,
    script: String,
    owner: OwnerReference,
) -> Result<Job, Report<RenderError>> {
    let mut job = skeleton(template, templates::HOST_JOB)?;
    set_metadata(&mut job, claim_name, namespace, owner);

    let pod_spec = pod_spec_mut(&mut job, template)?;
    pod_spec.node_name = Some(node_name.to_string());

    let container = container_mut(pod_spec, template)?;
    container.name = template.to_string();
    container.env = Some(env);
    container.command = Some(vec!["bash".to_string(), "-exc".to_string(), script]);

    Ok(job)
}

fn skeleton(template: &'static str, raw: &str) -> Result<Job, Report<RenderError>> {
    serde_yaml::from_str(raw).change_context(RenderError::Template { template })
}

fn set_metadata(job: &mut Job, claim_name: &str, namespace: &str, owner: OwnerReference) {
    job.metadata.name = Some(render_job_name(claim_name, namespace));
    job.metadata.namespace = Some(namespace.to_string());
    job.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(CLAIM_LABEL.to_string(), claim_name.to_string());
    job.metadata.owner_references = Some(vec![owner]);
}

fn pod_spec_mut<'a>(
    job: &'a mut Job,
    template: &'static str,
) -> Result<&'a mut PodSpec, Report<RenderError>> {
    job.spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .ok_or_else(|| {
            Report::new(RenderError::Skeleton {
                template,
                field: "spec.template.spec",
            })
        })
}

fn container_mut<'a>(
    pod_spec: &'a mut PodSpec,
    template: &'static str,
) -> Result<&'a mut Container, Report<RenderError>> {
    pod_spec.containers.first_mut().ok_or_else(|| {
        Report::new(RenderError::Skeleton {
            template,
            field: "containers",
        })
    })
}

fn node_affinity(node_name: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_fields: Some(vec![NodeSelectorRequirement {
                        key: "metadata.name".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node_name.to_string()]),
                    }]),
                    match_expressions: None,
                }],
            }),
            preferred_during_scheduling_ignored_during_execution: None,
        }),
        ..Default::default()
    }
}
