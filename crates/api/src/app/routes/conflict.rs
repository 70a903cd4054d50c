//! Conflict demonstration endpoints.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use globalcat_products::ConflictRequest;

use crate::app::errors;
use crate::app::routes::product_key;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/simulate-conflict", post(simulate_conflict))
        .route("/simulate-conflict-body", post(simulate_conflict_body))
        .route("/explain-merge/:product_id/:region_code", get(explain_merge))
}

pub async fn simulate_conflict(
    Extension(services): Extension<Arc<AppServices>>,
    request: Result<Query<ConflictRequest>, QueryRejection>,
) -> axum::response::Response {
    match request {
        Ok(Query(request)) => run_conflict(&services, &request).await,
        Err(rejection) => errors::rejection_to_response(rejection),
    }
}

pub async fn simulate_conflict_body(
    Extension(services): Extension<Arc<AppServices>>,
    request: Result<Json<ConflictRequest>, JsonRejection>,
) -> axum::response::Response {
    match request {
        Ok(Json(request)) => run_conflict(&services, &request).await,
        Err(rejection) => errors::rejection_to_response(rejection),
    }
}

async fn run_conflict(services: &AppServices, request: &ConflictRequest) -> axum::response::Response {
    match services.products.simulate_conflict(request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn explain_merge(
    Extension(services): Extension<Arc<AppServices>>,
    Path((product_id, region_code)): Path<(String, String)>,
) -> axum::response::Response {
    let (product_id, region_code) = match product_key(&product_id, &region_code) {
        Ok(ids) => ids,
        Err(e) => return errors::catalog_error_to_response(e),
    };

    match services
        .products
        .explain_winner(&product_id, &region_code)
        .await
    {
        Ok(explanation) => Json(explanation).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}
