use std::sync::Arc;

use anyhow::Result;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::DaemonArgs;
use crate::drivers::DriverRegistry;
use crate::gate::OperationGate;
use crate::monitor::VolumeMonitor;
use crate::mutator::PodMutator;
use crate::platform::k8s::ClusterApi;
use crate::platform::k8s::KubeCluster;
use crate::platform::kube_client::init_kube_client;
use crate::platform::scrape::HttpScraper;
use crate::reconciler::ClaimReconciler;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let client = init_kube_client(self.daemon_args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize kubernetes client: {e:?}"))?;
        let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));

        let drivers = DriverRegistry::with_builtin();
        preflight_drivers(cluster.as_ref(), &drivers).await;

        // shared by the monitor and the reconciler, drained on shutdown, the
        // mutator never takes it
        let gate = OperationGate::new();

        let scraper = HttpScraper::new(self.daemon_args.scrape_timeout())
            .map_err(|e| anyhow::anyhow!("Failed to create metrics scraper: {e:?}"))?;

        let monitor = Arc::new(VolumeMonitor::new(
            cluster.clone(),
            Arc::new(scraper),
            drivers.clone(),
            gate.clone(),
            self.daemon_args.monitor_interval(),
        ));

        let reconciler = Arc::new(ClaimReconciler::new(cluster.clone(), gate.clone()));

        let mutator = Arc::new(PodMutator::new(
            cluster,
            drivers,
            self.daemon_args.strict,
            self.daemon_args.scheduler_name.clone(),
        ));

        let services = ApplicationServices {
            client,
            monitor,
            reconciler,
            mutator,
            gate,
        };

        Ok(Application::new(services, self.daemon_args))
    }
}

/// Logs whether the controller pods of every registered backend are running.
///
/// Returns the provisioners whose controller pods were found.
pub(crate) async fn preflight_drivers(
    cluster: &dyn ClusterApi,
    drivers: &DriverRegistry,
) -> Vec<&'static str> {
    let mut present = Vec::new();

    for driver in drivers.drivers() {
        let selector = driver
            .csi_driver_pod_labels()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");

        match cluster
            .list_pods(driver.csi_driver_namespace(), &selector)
            .await
        {
            Ok(pods) if !pods.is_empty() => {
                tracing::info!(
                    provisioner = driver.provisioner(),
                    pods = pods.len(),
                    "CSI driver controller found"
                );
                present.push(driver.provisioner());
            }
            Ok(_) => tracing::info!(
                provisioner = driver.provisioner(),
                namespace = driver.csi_driver_namespace(),
                %selector,
                "CSI driver controller not found, its storage classes will be rejected at runtime"
            ),
            Err(e) => tracing::warn!(
                provisioner = driver.provisioner(),
                "Failed to look up CSI driver controller: {e:?}"
            ),
        }
    }

    present
}
