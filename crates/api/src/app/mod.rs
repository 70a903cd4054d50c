//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection, retry wrapping, background tasks
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use globalcat_core::CatalogConfig;
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// The router plus the services behind it, so callers can shut them down.
pub struct App {
    pub router: Router,
    pub services: Arc<AppServices>,
}

/// Build the full HTTP application (public entrypoint used by `main.rs`).
pub async fn build_app(config: CatalogConfig) -> anyhow::Result<App> {
    let header_state = middleware::HeaderState {
        region: config.home_region.clone(),
        policy: config.read_consistency,
    };
    let services = Arc::new(services::build_services(config).await?);

    let router = routes::router()
        .layer(Extension(Arc::clone(&services)))
        .layer(
            ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
                header_state,
                middleware::observability_headers,
            )),
        );

    Ok(App { router, services })
}
