//! Fetches node exporter metrics from the sidecars of mutated pods.

use core::error::Error;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;

/// Port the metrics sidecar listens on.
pub const METRICS_PORT: u16 = 9100;

#[derive(Debug, derive_more::Display)]
pub enum ScrapeError {
    #[display("Failed to reach metrics endpoint {url}")]
    Request { url: String },
    #[display("Metrics endpoint {url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[display("Failed to read metrics body from {url}")]
    Body { url: String },
}

impl Error for ScrapeError {}

/// Source of raw exposition text for a pod address.
#[async_trait]
pub trait MetricsScraper: Send + Sync {
    async fn scrape(&self, pod_ip: &str) -> Result<String, Report<ScrapeError>>;
}

/// Exporter endpoint of `pod_ip`, IPv6 addresses are bracketed.
pub fn metrics_url(pod_ip: &str) -> String {
    match pod_ip.parse::<IpAddr>() {
        Ok(ip) => format!("http://{}/metrics", SocketAddr::new(ip, METRICS_PORT)),
        Err(_) => format!("http://{pod_ip}:{METRICS_PORT}/metrics"),
    }
}

/// Plain HTTP scraper.
pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new(timeout: Duration) -> Result<Self, Report<ScrapeError>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(ScrapeError::Request {
                url: String::new(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsScraper for HttpScraper {
    async fn scrape(&self, pod_ip: &str) -> Result<String, Report<ScrapeError>> {
        let url = metrics_url(pod_ip);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .change_context_lazy(|| ScrapeError::Request { url: url.clone() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Report::new(ScrapeError::Status {
                url,
                status: status.as_u16(),
            }));
        }

        response
            .text()
            .await
            .change_context(ScrapeError::Body { url })
    }
}
