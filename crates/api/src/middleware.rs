//! Response headers every catalog endpoint carries.

use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

use globalcat_core::{ConsistencyPolicy, RegionCode};

pub const REGION_HEADER: &str = "x-region";
pub const CONSISTENCY_HEADER: &str = "x-consistency";
pub const PROCESS_MS_HEADER: &str = "x-server-processms";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct HeaderState {
    pub region: RegionCode,
    pub policy: ConsistencyPolicy,
}

/// Stamp region, read policy, processing time and a request id on the response.
///
/// An incoming `X-Request-Id` is echoed back; otherwise a UUIDv7 is minted.
pub async fn observability_headers(
    State(state): State<HeaderState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let span = tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = %request_id,
    );
    let mut res = next.run(req).instrument(span).await;

    let process_ms = started.elapsed().as_secs_f64() * 1000.0;
    let headers = res.headers_mut();
    insert(headers, REGION_HEADER, state.region.as_str());
    insert(headers, CONSISTENCY_HEADER, state.policy.as_str());
    insert(headers, PROCESS_MS_HEADER, &format!("{process_ms:.2}"));
    insert(headers, REQUEST_ID_HEADER, &request_id);

    tracing::debug!(status = res.status().as_u16(), process_ms, request_id = %request_id, "request handled");
    res
}

fn insert(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
