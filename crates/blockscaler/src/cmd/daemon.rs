use anyhow::Result;
use utils::version;

use crate::app::ApplicationBuilder;
use crate::config::DaemonArgs;
use crate::logging;

pub async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.metrics_file.clone());

    tracing::info!("Starting blockscaler daemon {}", &**version::VERSION);

    let app = ApplicationBuilder::new(daemon_args).build().await?;

    // a failed task still lets the running volume operation finish
    let result = app.run().await;
    app.shutdown().await?;

    result
}
