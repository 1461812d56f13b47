use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionRequest;
use kube::core::admission::AdmissionResponse;
use kube::core::admission::AdmissionReview;
use kube::core::DynamicObject;
use poem::handler;
use poem::web::Data;
use poem::web::Json;
use tracing::info;
use tracing::warn;

use crate::mutator::PodMutator;

/// Mutates a pod admission review
#[handler]
pub async fn mutate_pod(
    Json(review): Json<AdmissionReview<Pod>>,
    mutator: Data<&Arc<PodMutator>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!("Invalid admission review: {e}");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    info!(
        name = %request.name,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        "Admission review received"
    );

    let response = mutator.review(&request).await;
    Json(response.into_review())
}

#[handler]
pub async fn healthz() -> &'static str {
    "ok"
}
