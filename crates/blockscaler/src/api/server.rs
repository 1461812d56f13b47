use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use poem::get;
use poem::listener::Listener;
use poem::listener::RustlsCertificate;
use poem::listener::RustlsConfig;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::handlers::healthz;
use super::handlers::mutate_pod;
use super::ApiError;
use crate::mutator::PodMutator;

/// Certificate and private key in PEM format.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// HTTP server of the pod admission webhook
pub struct AdmissionServer {
    mutator: Arc<PodMutator>,
    listen_addr: String,
    tls: Option<TlsFiles>,
}

impl AdmissionServer {
    pub fn new(mutator: Arc<PodMutator>, listen_addr: String, tls: Option<TlsFiles>) -> Self {
        Self {
            mutator,
            listen_addr,
            tls,
        }
    }

    fn routes(mutator: Arc<PodMutator>) -> impl poem::Endpoint {
        Route::new()
            .at("/mutate-v1-pod", post(mutate_pod))
            .at("/healthz", get(healthz))
            .data(mutator)
            .with(Tracing)
    }

    /// Serves until the token is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ApiError::TlsFile`] if the certificate or the key cannot be read
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, token: CancellationToken) -> Result<(), Report<ApiError>> {
        let app = Self::routes(self.mutator);

        let listener = match &self.tls {
            Some(tls) => {
                info!("Starting admission webhook on {} (TLS)", self.listen_addr);
                let cert = read_pem(&tls.cert).await?;
                let key = read_pem(&tls.key).await?;
                TcpListener::bind(self.listen_addr.clone())
                    .rustls(RustlsConfig::new().fallback(RustlsCertificate::new().cert(cert).key(key)))
                    .boxed()
            }
            None => {
                info!("Starting admission webhook on {}", self.listen_addr);
                TcpListener::bind(self.listen_addr.clone()).boxed()
            }
        };
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("Admission webhook stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("Admission webhook failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = token.cancelled() => {
                info!("Admission webhook shutdown requested");
                Ok(())
            }
        }
    }
}

async fn read_pem(path: &PathBuf) -> Result<Vec<u8>, Report<ApiError>> {
    tokio::fs::read(path)
        .await
        .change_context_lazy(|| ApiError::TlsFile {
            path: path.display().to_string(),
        })
}
