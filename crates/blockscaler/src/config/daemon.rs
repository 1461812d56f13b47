use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::api::TlsFiles;

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "WEBHOOK_LISTEN_ADDR",
        default_value = "0.0.0.0:9443",
        help = "Admission webhook listen address"
    )]
    pub webhook_listen_addr: String,

    #[arg(
        long,
        env = "TLS_CERT_FILE",
        value_hint = clap::ValueHint::FilePath,
        requires = "tls_key",
        help = "PEM certificate of the admission webhook"
    )]
    pub tls_cert: Option<PathBuf>,

    #[arg(
        long,
        env = "TLS_KEY_FILE",
        value_hint = clap::ValueHint::FilePath,
        requires = "tls_cert",
        help = "PEM private key of the admission webhook"
    )]
    pub tls_key: Option<PathBuf>,

    #[arg(
        long,
        env = "BLOCKSCALER_STRICT",
        help = "Deny pods whose volumes cannot be attached instead of admitting them unmodified",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub strict: bool,

    #[arg(
        long,
        env = "BLOCKSCALER_MONITOR_INTERVAL_SECS",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between two volume monitor cycles"
    )]
    pub monitor_interval_secs: u64,

    #[arg(
        long,
        env = "BLOCKSCALER_SCRAPE_TIMEOUT_SECS",
        default_value = "5",
        help = "Timeout of a single metrics scrape in seconds"
    )]
    pub scrape_timeout_secs: u64,

    #[arg(
        long,
        env = "BLOCKSCALER_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/metrics.log",
        help = "Path for printing volume metrics, e.g. /logs/metrics.log"
    )]
    pub metrics_file: Option<PathBuf>,

    #[arg(
        long,
        env = "BLOCKSCALER_SCHEDULER_NAME",
        default_value = "blockscaler-scheduler",
        help = "Scheduler name set on mutated pods"
    )]
    pub scheduler_name: String,

    #[arg(
        long,
        help = "Enable the volume monitor",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_monitor: bool,

    #[arg(
        long,
        help = "Enable the claim reconciler",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_reconciler: bool,

    #[arg(
        long,
        help = "Enable the pod admission webhook",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_webhook: bool,
}

impl DaemonArgs {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn tls_files(&self) -> Option<TlsFiles> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}
