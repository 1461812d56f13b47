//! Platform layer - everything that talks to the cluster or to the network

pub mod k8s;
pub mod kube_client;
pub mod scrape;
