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

use globalcat_core::ProductId;

use crate::app::routes::location_key;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/inventory", post(apply_delta))
        .route("/inventory/:product_id", get(get_product_inventory))
        .route("/inventory/:product_id/:warehouse_id", get(get_location))
}

pub async fn apply_delta(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::InventoryIn>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };
    let (product_id, warehouse_id, region) =
        match location_key(&body.product_id, &body.warehouse_id, &body.region_code) {
            Ok(ids) => ids,
            Err(e) => return errors::catalog_error_to_response(e),
        };

    match services
        .inventory
        .apply_delta(&product_id, &warehouse_id, &region, body.inc, body.dec)
        .await
    {
        Ok(applied) => Json(dto::InventoryWriteResponse {
            ok: true,
            latency_ms: applied.latency_ms,
            item: applied.item,
            merged_qty: applied.merged_qty,
        })
        .into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

/// `?region=` defaults to the home region.
pub async fn get_location(
    Extension(services): Extension<Arc<AppServices>>,
    Path((product_id, warehouse_id)): Path<(String, String)>,
    query: Result<Query<dto::LocationQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };
    let region = query
        .region
        .unwrap_or_else(|| services.config.home_region.as_str().to_string());
    let (product_id, warehouse_id, region) = match location_key(&product_id, &warehouse_id, &region) {
        Ok(ids) => ids,
        Err(e) => return errors::catalog_error_to_response(e),
    };

    match services
        .inventory
        .read_location(&product_id, &warehouse_id, &region)
        .await
    {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn get_product_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id = match ProductId::new(product_id) {
        Ok(id) => id,
        Err(e) => return errors::catalog_error_to_response(e),
    };

    match services.inventory.read_product(&product_id).await {
        Ok(inventory) => Json(inventory).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}
