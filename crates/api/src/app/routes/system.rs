use std::sync::Arc;

use axum::{extract::Extension, routing::get, Json, Router};

use globalcat_core::PolicyExplanation;

use crate::app::dto::HealthResponse;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/explain-consistency", get(explain_consistency))
}

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        region: services.config.home_region.clone(),
    })
}

pub async fn explain_consistency(
    Extension(services): Extension<Arc<AppServices>>,
) -> Json<PolicyExplanation> {
    Json(services.config.read_consistency.explain())
}
