use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::daemon::DaemonArgs;
use crate::drivers::query::DriverQuery;
use crate::drivers::query::QueryInputs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the volume autoscaling control plane
    Daemon(Box<DaemonArgs>),
    /// Answer a storage driver query
    Driver(DriverArgs),
    /// Print a host job manifest
    #[command(name = "render-job", subcommand)]
    RenderJob(RenderJobCommand),
}

#[derive(Args, Clone)]
pub struct DriverArgs {
    #[arg(help = "Storage provisioner, e.g. ebs.csi.aws.com")]
    pub provisioner: String,

    #[arg(value_enum, help = "Query to answer")]
    pub query: DriverQuery,

    #[arg(
        long,
        env = "STORAGE_CLASS_JSON",
        help = "StorageClass to validate, as JSON"
    )]
    pub storage_class_json: Option<String>,

    #[arg(long, env = "PVC_NAME", default_value = "", help = "Name of the claim stub")]
    pub pvc_name: String,

    #[arg(
        long,
        env = "PVC_NAMESPACE",
        default_value = "",
        help = "Namespace of the claim stub"
    )]
    pub pvc_namespace: String,

    #[arg(
        long,
        env = "STORAGE_CLASS_NAME",
        default_value = "",
        help = "StorageClass of the claim stub"
    )]
    pub storage_class_name: String,
}

impl From<&DriverArgs> for QueryInputs {
    fn from(args: &DriverArgs) -> Self {
        Self {
            storage_class_json: args.storage_class_json.clone(),
            pvc_name: args.pvc_name.clone(),
            pvc_namespace: args.pvc_namespace.clone(),
            storage_class_name: args.storage_class_name.clone(),
        }
    }
}

#[derive(Subcommand, Clone)]
pub enum RenderJobCommand {
    /// Job binding the volume of a claim to a node
    Attach(AttachJobArgs),
    /// Job mounting the device of a claim into running containers
    Mount(MountJobArgs),
    /// Job growing the file system of a claim
    Resize(ResizeJobArgs),
}

/// Claim and node shared by every job
#[derive(Args, Clone)]
pub struct JobTarget {
    #[arg(long, help = "Claim the job works on")]
    pub claim: String,

    #[arg(long, help = "UID of the claim, owner of the job")]
    pub claim_uid: String,

    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub namespace: String,

    #[arg(long, help = "Node the job runs on")]
    pub node: String,
}

#[derive(Args, Clone)]
pub struct AttachJobArgs {
    #[command(flatten)]
    pub target: JobTarget,
}

#[derive(Args, Clone)]
pub struct MountJobArgs {
    #[command(flatten)]
    pub target: JobTarget,

    #[arg(long, help = "Persistent volume bound to the claim")]
    pub volume: String,

    #[arg(long, help = "Storage provisioner of the volume")]
    pub provisioner: String,

    #[arg(long, default_value = "ext4", help = "File system of the volume")]
    pub fs: String,

    #[arg(long, help = "Mount point inside the containers")]
    pub mount_point: String,

    #[arg(long = "container-id", help = "Container to mount into, repeatable")]
    pub container_ids: Vec<String>,

    #[arg(
        long,
        help = "Resolve container PIDs through the host PID namespace",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub host_pid: bool,
}

#[derive(Args, Clone)]
pub struct ResizeJobArgs {
    #[command(flatten)]
    pub target: JobTarget,

    #[arg(long, help = "Persistent volume bound to the claim")]
    pub volume: String,

    #[arg(long, help = "Storage provisioner of the volume")]
    pub provisioner: String,

    #[arg(long, default_value = "ext4", help = "File system of the volume")]
    pub fs: String,
}
