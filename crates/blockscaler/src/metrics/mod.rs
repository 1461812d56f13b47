use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use influxdb_line_protocol::LineProtocolBuilder;

pub mod exposition;

/// Measurement of every evaluated volume sample.
pub const VOLUME_MEASUREMENT: &str = "blockscaler_volume";

// Wrapper struct for Vec<u8> that implements Display
pub struct BytesWrapper(Vec<u8>);

impl fmt::Display for BytesWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "");
        }

        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => {
                tracing::error!(msg = "Failed to convert bytes to string");
                Err(fmt::Error)
            }
        }
    }
}

impl From<Vec<u8>> for BytesWrapper {
    fn from(bytes: Vec<u8>) -> Self {
        BytesWrapper(bytes)
    }
}

/// One growth evaluation of a managed claim.
#[derive(Debug, Clone)]
pub struct VolumeMetrics<'a> {
    pub namespace: &'a str,
    pub pod: &'a str,
    pub config: &'a str,
    pub claim: &'a str,
    pub mount_point: &'a str,
    pub available_bytes: f64,
    pub capacity_bytes: u64,
    pub maximum_bytes: u64,
    pub threshold_bytes: f64,
    pub decision: &'a str,
}

/// Encodes a volume evaluation as one InfluxDB line.
pub fn encode_volume_metrics(metrics: &VolumeMetrics<'_>, timestamp: i64) -> String {
    let line = LineProtocolBuilder::new()
        .measurement(VOLUME_MEASUREMENT)
        .tag("namespace", metrics.namespace)
        .tag("pod", metrics.pod)
        .tag("config", metrics.config)
        .tag("claim", metrics.claim)
        .tag("mountpoint", metrics.mount_point)
        .field("available_bytes", metrics.available_bytes)
        .field("capacity_bytes", metrics.capacity_bytes)
        .field("maximum_bytes", metrics.maximum_bytes)
        .field("threshold_bytes", metrics.threshold_bytes)
        .field("decision", metrics.decision)
        .timestamp(timestamp)
        .close_line()
        .build();

    BytesWrapper::from(line).to_string()
}

/// Writes the evaluation to the metrics log.
pub fn emit_volume_metrics(metrics: &VolumeMetrics<'_>) {
    let metrics_str = encode_volume_metrics(metrics, current_time());
    tracing::info!(
        target: "metrics",
        msg = %metrics_str,
    );
}

/// Nanoseconds since the epoch.
pub fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn encodes_volume_line() {
        let metrics = VolumeMetrics {
            namespace: "default",
            pod: "web-0",
            config: "logs",
            claim: "ebs-csi-aws-com-0123456789abcdef",
            mount_point: "/media/logs",
            available_bytes: 1024.0,
            capacity_bytes: 4096,
            maximum_bytes: 8192,
            threshold_bytes: 409.6,
            decision: "sufficient",
        };

        let line = encode_volume_metrics(&metrics, 1_700_000_000_000_000_000);

        assert!(line.starts_with("blockscaler_volume,"));
        assert!(line.contains("namespace=default"));
        assert!(line.contains("pod=web-0"));
        assert!(line.contains("claim=ebs-csi-aws-com-0123456789abcdef"));
        assert!(line.contains("available_bytes=1024"));
        assert!(line.contains("capacity_bytes=4096u"));
        assert!(line.contains("maximum_bytes=8192u"));
        assert!(line.contains("threshold_bytes=409.6"));
        assert!(line.contains("decision=\"sufficient\""));
        assert!(line.contains("1700000000000000000"));
    }

    #[test]
    fn bytes_wrapper_displays_utf8() {
        assert_eq!(BytesWrapper::from(b"ok".to_vec()).to_string(), "ok");
        assert_eq!(BytesWrapper::from(Vec::new()).to_string(), "");
    }
}
