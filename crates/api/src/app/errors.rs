use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use globalcat_core::CatalogError;

pub fn catalog_error_to_response(err: CatalogError) -> axum::response::Response {
    match err {
        CatalogError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        CatalogError::InvalidDelta(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_delta", msg),
        CatalogError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        CatalogError::StoreUnavailable(msg) => {
            tracing::warn!(error = %msg, "store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        CatalogError::DataCorruption(msg) => {
            tracing::error!(error = %msg, "stored data is corrupt");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "data_corruption", msg)
        }
    }
}

/// Malformed request bodies, query strings and paths.
pub fn rejection_to_response(rejection: impl std::fmt::Display) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
