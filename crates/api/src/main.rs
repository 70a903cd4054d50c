use anyhow::Context;

use globalcat_core::CatalogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    globalcat_observability::init();

    let config = CatalogConfig::from_env().context("invalid catalog configuration")?;
    let bind_addr = config.bind_addr.clone();

    let app = globalcat_api::app::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
