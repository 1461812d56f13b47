//! Admission webhook HTTP API
//!
//! # API Endpoints
//!
//! - `POST /mutate-v1-pod` - Mutating admission webhook for pods (`AdmissionReview` v1)
//! - `GET /healthz` - Liveness check
//!
//! The server speaks TLS when a certificate and a key are configured, the
//! API server refuses plain HTTP webhooks outside of local setups.

use core::error::Error;

pub mod handlers;
pub mod server;

pub use server::AdmissionServer;
pub use server::TlsFiles;

/// API errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
    #[display("Unable to read TLS file {path}")]
    TlsFile { path: String },
}

impl Error for ApiError {}
