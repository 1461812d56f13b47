use anyhow::Result;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::config::JobTarget;
use crate::config::RenderJobCommand;
use crate::drivers::Driver;
use crate::drivers::DriverRegistry;
use crate::jobs;
use crate::jobs::FileSystem;
use crate::jobs::MountJobParams;
use crate::jobs::ResizeJobParams;

/// Prints the rendered job manifest as YAML on stdout.
pub fn run_render_job(command: RenderJobCommand) -> Result<()> {
    utils::logging::init();

    let job = render(&DriverRegistry::with_builtin(), &command)?;
    print!("{}", serde_yaml::to_string(&job)?);
    Ok(())
}

fn render(drivers: &DriverRegistry, command: &RenderJobCommand) -> Result<Job> {
    let job = match command {
        RenderJobCommand::Attach(args) => {
            let target = &args.target;
            jobs::render_attach_job(&target.claim, &target.namespace, &target.node, owner(target)?)
        }
        RenderJobCommand::Mount(args) => {
            let driver = driver(drivers, &args.provisioner)?;
            let params = MountJobParams {
                claim_name: args.target.claim.clone(),
                volume_name: args.volume.clone(),
                namespace: args.target.namespace.clone(),
                node_name: args.target.node.clone(),
                file_system: FileSystem::parse(&args.fs),
                mount_point: args.mount_point.clone(),
                container_ids: args.container_ids.clone(),
                pre_mount_command: driver.pre_mount_command(),
                host_pid: args.host_pid,
                volume_attachment_meta: driver.wait_for_volume_attachment_meta(),
            };
            jobs::render_mount_job(&params, owner(&args.target)?)
        }
        RenderJobCommand::Resize(args) => {
            let driver = driver(drivers, &args.provisioner)?;
            let params = ResizeJobParams {
                claim_name: args.target.claim.clone(),
                volume_name: args.volume.clone(),
                namespace: args.target.namespace.clone(),
                node_name: args.target.node.clone(),
                file_system: FileSystem::parse(&args.fs),
                pre_resize_command: driver.pre_resize_command(),
                volume_attachment_meta: driver.wait_for_volume_attachment_meta(),
            };
            jobs::render_resize_job(&params, owner(&args.target)?)
        }
    };

    job.map_err(|e| anyhow::anyhow!("Failed to render job: {e:?}"))
}

fn driver(
    drivers: &DriverRegistry,
    provisioner: &str,
) -> Result<std::sync::Arc<dyn Driver>> {
    drivers
        .get(provisioner)
        .map_err(|e| anyhow::anyhow!("{e:?}"))
}

fn owner(target: &JobTarget) -> Result<OwnerReference> {
    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(target.claim.clone()),
            namespace: Some(target.namespace.clone()),
            uid: Some(target.claim_uid.clone()),
            ..Default::default()
        },
        ..Default::default()
    };

    jobs::claim_owner_reference(&claim).map_err(|e| anyhow::anyhow!("{e:?}"))
}

#[cfg(test)]
mod tests {
    use api_types::CLAIM_LABEL;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::AttachJobArgs;
    use crate::config::ResizeJobArgs;

    fn target() -> JobTarget {
        JobTarget {
            claim: "data".to_string(),
            claim_uid: "uid-1".to_string(),
            namespace: "default".to_string(),
            node: "node-a".to_string(),
        }
    }

    #[test]
    fn attach_job_is_owned_by_claim() {
        let job = render(
            &DriverRegistry::with_builtin(),
            &RenderJobCommand::Attach(AttachJobArgs { target: target() }),
        )
        .unwrap();

        let owners = job.metadata.owner_references.unwrap();
        assert_eq!(owners[0].uid, "uid-1");
        assert_eq!(owners[0].kind, "PersistentVolumeClaim");
        assert_eq!(
            job.metadata.labels.unwrap().get(CLAIM_LABEL).map(String::as_str),
            Some("data")
        );
    }

    #[test]
    fn resize_job_runs_on_node() {
        let job = render(
            &DriverRegistry::with_builtin(),
            &RenderJobCommand::Resize(ResizeJobArgs {
                target: target(),
                volume: "pv-1".to_string(),
                provisioner: "ebs.csi.aws.com".to_string(),
                fs: "xfs".to_string(),
            }),
        )
        .unwrap();

        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod_spec.node_name.as_deref(), Some("node-a"));
        let manifest = serde_yaml::to_string(&pod_spec.containers[0]).unwrap();
        assert!(manifest.contains("xfs_growfs"));
    }

    #[test]
    fn unknown_provisioner_is_rejected() {
        let result = render(
            &DriverRegistry::with_builtin(),
            &RenderJobCommand::Resize(ResizeJobArgs {
                target: target(),
                volume: "pv-1".to_string(),
                provisioner: "example.com/none".to_string(),
                fs: "ext4".to_string(),
            }),
        );

        assert!(result.is_err());
    }
}
