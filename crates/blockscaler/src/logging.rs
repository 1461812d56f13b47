//! Daemon tracing setup
//!
//! Human readable logs go through [`utils::logging::get_fmt_layer`], events
//! with the `metrics` target are written verbatim to a rotated metrics file.

use std::env;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use utils::logging::LOG_PATH_ENV_VAR;

/// Target of the events carrying InfluxDB lines.
pub const METRICS_TARGET: &str = "metrics";

const DEFAULT_METRICS_FILE: &str = "/logs/metrics.log";
const DEFAULT_METRICS_PREFIX: &str = "metrics.log";

/// Writes the `msg` of a metrics event as is, one line per event.
struct InfluxDBFormatter;

struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, _: &Field, value: &str) {
        self.line.push_str(value);
    }

    fn record_debug(&mut self, _: &Field, value: &dyn fmt::Debug) {
        self.line.push_str(&format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for InfluxDBFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = LineVisitor {
            line: String::new(),
        };
        event.record(&mut visitor);
        // lines built with the line protocol builder already end with a newline
        if visitor.line.ends_with('\n') {
            write!(writer, "{}", visitor.line)
        } else {
            writeln!(writer, "{}", visitor.line)
        }
    }
}

/// Directory and file prefix of the rotated metrics file.
fn metrics_location(metrics_file: &Path) -> (PathBuf, String) {
    if metrics_file.is_dir() {
        return (metrics_file.to_path_buf(), DEFAULT_METRICS_PREFIX.to_string());
    }

    let dir = metrics_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_METRICS_PREFIX);

    (dir.to_path_buf(), prefix.to_string())
}

/// initiate the global tracing subscriber
pub fn init<P: AsRef<Path>>(metrics_file: Option<P>) -> WorkerGuard {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let fmt_layer = utils::logging::get_fmt_layer(log_path);

    let metrics_file = metrics_file
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_METRICS_FILE));
    let (rotation_dir, prefix) = metrics_location(&metrics_file);

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt_layer.with_filter(env_filter.and(filter::filter_fn(|metadata| {
        metadata.target() != METRICS_TARGET
    })));

    let (file_writer, file_guard) = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&prefix)
        .max_log_files(3)
        .build(&rotation_dir)
    {
        Ok(appender) => tracing_appender::non_blocking(appender),
        Err(err) => {
            eprintln!(
                "failed to create metrics rolling file appender at {}: {err}; falling back to stdout",
                rotation_dir.display()
            );
            tracing_appender::non_blocking(std::io::stdout())
        }
    };

    let metrics_layer = layer()
        .event_format(InfluxDBFormatter)
        .fmt_fields(format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            metadata.target() == METRICS_TARGET
        }));

    registry().with(fmt_layer).with(metrics_layer).init();
    file_guard
}
