//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable pointing to a log file, logs go to stderr when unset.
pub const LOG_PATH_ENV_VAR: &str = "BLOCKSCALER_LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "blockscaler.log";

/// Builds the human readable log layer.
///
/// With a `log_path` the layer writes to a daily rotated file next to it,
/// otherwise to stderr.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = log_path.and_then(|log_path| {
        let log_path = Path::new(&log_path);
        let dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = log_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_LOG_PREFIX);

        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .max_log_files(7)
            .build(dir)
        {
            Ok(appender) => Some(appender),
            Err(err) => {
                eprintln!(
                    "failed to create log file appender at {}: {err}, logging to stderr",
                    dir.display()
                );
                None
            }
        }
    });

    match appender {
        Some(appender) => layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        None => layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    }
}

/// initiate the global tracing subscriber
pub fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = get_fmt_layer(std::env::var(LOG_PATH_ENV_VAR).ok()).with_filter(env_filter);

    registry().with(fmt_layer).init();
}
