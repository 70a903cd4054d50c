use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};

use globalcat_core::ReadOutcome;

use crate::app::routes::product_key;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/products", put(put_product))
        .route("/products/:product_id/:region_code", get(get_product))
}

pub async fn put_product(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ProductIn>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };
    let (product_id, region_code) = match product_key(&body.product_id, &body.region_code) {
        Ok(ids) => ids,
        Err(e) => return errors::catalog_error_to_response(e),
    };

    match services
        .products
        .write(&product_id, &region_code, body.payload())
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> axum::response::Response {
    let Path((product_id, region_code)) = match path {
        Ok(path) => path,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };
    let (product_id, region_code) = match product_key(&product_id, &region_code) {
        Ok(ids) => ids,
        Err(e) => return errors::catalog_error_to_response(e),
    };

    match services.products.read(&product_id, &region_code).await {
        Ok(ReadOutcome {
            value: Some(item),
            mode,
            latency_ms,
            region,
        }) => Json(dto::ProductReadResponse {
            found: true,
            item,
            latency_ms,
            consistency: mode,
            region,
        })
        .into_response(),
        Ok(_) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "Not found"),
        Err(e) => errors::catalog_error_to_response(e),
    }
}
