//! Shell scripts run by host jobs.
//!
//! Every script is a chain of steps joined with `&&`, so a failed device
//! lookup aborts the rest, and it always ends with `echo ok` so a successful
//! run is visible in the job log.

use std::fmt;

/// Marker printed by every successful script.
pub const SUCCESS_MARKER: &str = "echo ok";

/// Runs a command in the mount namespace of the host init process.
const HOST: &str = "chroot /host nsenter --target 1 --mount";

const GLOBAL_MOUNT: &str = "/var/lib/kubelet/plugins/kubernetes.io/csi/pv/${PV_NAME}/globalmount";

/// Finds the PID of `${CONTAINER_ID}` through docker, falling back to the CRI.
const CONTAINER_PID: &str = "PID=$(docker inspect -f '{{.State.Pid}}' ${CONTAINER_ID} || crictl inspect --output go-template --template '{{.info.pid}}' ${CONTAINER_ID})";

/// `&&` chained shell steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPipeline {
    steps: Vec<String>,
}

impl CommandPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step, blank steps are dropped.
    pub fn step(mut self, command: impl Into<String>) -> Self {
        let command = command.into();
        let command = command.trim();
        if !command.is_empty() {
            self.steps.push(command.to_string());
        }
        self
    }

    /// Appends a backend supplied step when there is one.
    pub fn optional_step(self, command: Option<&str>) -> Self {
        match command {
            Some(command) => self.step(command),
            None => self,
        }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Renders the script, terminated by the success marker.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(SUCCESS_MARKER))
            .collect::<Vec<_>>()
            .join(" &&\n")
    }
}

/// File systems a resize job knows how to grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSystem {
    Ext3,
    Ext4,
    Xfs,
    Btrfs,
    Unsupported(String),
}

impl FileSystem {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "xfs" => Self::Xfs,
            "btrfs" => Self::Btrfs,
            other => Self::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Unsupported(name) => name,
        }
    }

    /// Step growing the file system on `${DEV}`.
    ///
    /// An unsupported file system is only reported so the job still succeeds.
    pub fn grow_step(&self) -> String {
        match self {
            Self::Ext3 | Self::Ext4 => format!("{HOST} resize2fs ${{DEV}}"),
            Self::Xfs => format!("{HOST} xfs_growfs -d ${{DEV}}"),
            Self::Btrfs => format!("{HOST} btrfs filesystem resize max ${{DEV}}"),
            Self::Unsupported(_) => "echo unsupported file-system ${FS}".to_string(),
        }
    }
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a mounted device is exposed inside the target containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStrategy {
    /// Create the block device node in every container and mount it there.
    DeviceNode,
    /// Bind the global mount of the volume into every container.
    BindGlobalMount,
}

impl MountStrategy {
    pub fn for_host_pid(host_pid: bool) -> Self {
        if host_pid {
            Self::BindGlobalMount
        } else {
            Self::DeviceNode
        }
    }

    /// Steps run for each of `${CONTAINER_IDS}`.
    pub fn steps(&self) -> Vec<String> {
        match self {
            Self::DeviceNode => vec![
                format!(
                    "DEV_MAJOR=$({HOST} cat /proc/self/mountinfo | grep ${{DEV}} | awk '{{print $3}}' | awk '{{split($0,a,\":\"); print a[1]}}')"
                ),
                format!(
                    "DEV_MINOR=$({HOST} cat /proc/self/mountinfo | grep ${{DEV}} | awk '{{print $3}}' | awk '{{split($0,a,\":\"); print a[2]}}')"
                ),
                container_loop(&[
                    "chroot /host nsenter --target ${PID} --mount mkdir -p /dev ${MOUNT_POINT}",
                    "chroot /host nsenter --target ${PID} --pid --mount mknod ${DEV} b ${DEV_MAJOR} ${DEV_MINOR}",
                    "chroot /host nsenter --target ${PID} --mount mount ${DEV} ${MOUNT_POINT}",
                ]),
            ],
            Self::BindGlobalMount => vec![container_loop(&[
                "chroot /host nsenter --target ${PID} --mount mkdir -p ${MOUNT_POINT}",
                &format!(
                    "chroot /host nsenter --target ${{PID}} --mount mount -o bind {GLOBAL_MOUNT} ${{MOUNT_POINT}}"
                ),
            ])],
        }
    }
}

fn container_loop(body: &[&str]) -> String {
    let body = std::iter::once(CONTAINER_PID)
        .chain(body.iter().copied())
        .collect::<Vec<_>>()
        .join(" &&\n  ");

    format!("for CONTAINER_ID in ${{CONTAINER_IDS}}; do\n  {body} || exit 1\ndone")
}

/// Script mounting `${DEV}` at its global mount and into the containers.
pub fn mount_script(pre_mount_command: Option<&str>, strategy: MountStrategy) -> String {
    let mut pipeline = CommandPipeline::new()
        .optional_step(pre_mount_command)
        .step(format!("{HOST} mkdir -p {GLOBAL_MOUNT}"))
        .step(format!("{HOST} mount ${{DEV}} {GLOBAL_MOUNT}"));

    for step in strategy.steps() {
        pipeline = pipeline.step(step);
    }

    pipeline.render()
}

/// Script growing the file system on `${DEV}`.
pub fn resize_script(pre_resize_command: Option<&str>, file_system: &FileSystem) -> String {
    CommandPipeline::new()
        .optional_step(pre_resize_command)
        .step(file_system.grow_step())
        .render()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn empty_pipeline_only_reports_success() {
        assert_eq!(CommandPipeline::new().render(), "echo ok");
    }

    #[test]
    fn blank_and_missing_steps_are_skipped() {
        let pipeline = CommandPipeline::new()
            .optional_step(None)
            .optional_step(Some("   "))
            .step("")
            .step("true");

        assert_eq!(pipeline.steps().to_vec(), vec!["true".to_string()]);
        assert_eq!(pipeline.render(), "true &&\necho ok");
    }

    #[test]
    fn file_system_names_round_trip() {
        for name in ["ext3", "ext4", "xfs", "btrfs", "zfs"] {
            assert_eq!(FileSystem::parse(name).as_str(), name);
        }
        assert_eq!(FileSystem::parse("zfs"), FileSystem::Unsupported("zfs".to_string()));
    }

    #[test]
    fn ext_variants_share_resize2fs() {
        assert_eq!(FileSystem::Ext3.grow_step(), FileSystem::Ext4.grow_step());
        assert!(FileSystem::Ext4.grow_step().ends_with("resize2fs ${DEV}"));
        assert!(FileSystem::Xfs.grow_step().ends_with("xfs_growfs -d ${DEV}"));
        assert!(FileSystem::Btrfs
            .grow_step()
            .ends_with("btrfs filesystem resize max ${DEV}"));
    }

    #[test]
    fn unsupported_file_system_still_succeeds() {
        let script = resize_script(None, &FileSystem::Unsupported("zfs".to_string()));

        assert_eq!(script, "echo unsupported file-system ${FS} &&\necho ok");
    }

    #[test]
    fn resize_script_starts_with_device_discovery() {
        let script = resize_script(Some("DEV=/dev/xvdb"), &FileSystem::Xfs);
        let steps: Vec<_> = script.split(" &&\n").collect();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], "DEV=/dev/xvdb");
        assert_eq!(steps[2], "echo ok");
    }

    #[test]
    fn strategy_follows_host_pid() {
        assert_eq!(MountStrategy::for_host_pid(true), MountStrategy::BindGlobalMount);
        assert_eq!(MountStrategy::for_host_pid(false), MountStrategy::DeviceNode);
    }

    #[test]
    fn device_node_mount_creates_block_device() {
        let script = mount_script(Some("DEV=/dev/xvdb"), MountStrategy::DeviceNode);

        assert!(script.starts_with("DEV=/dev/xvdb &&\n"));
        assert!(script.contains("mknod ${DEV} b ${DEV_MAJOR} ${DEV_MINOR}"));
        assert!(script.contains("for CONTAINER_ID in ${CONTAINER_IDS}; do"));
        assert!(!script.contains("mount -o bind"));
        assert!(script.ends_with("done &&\necho ok"));
    }

    #[test]
    fn bind_mount_resolves_pid_per_container() {
        let script = mount_script(None, MountStrategy::BindGlobalMount);

        let pid = script.find("PID=$(docker inspect").unwrap();
        let bind = script.find("mount -o bind").unwrap();
        assert!(pid < bind);
        assert!(!script.contains("mknod"));
        assert!(script.starts_with("chroot /host nsenter --target 1 --mount mkdir -p"));
    }
}
