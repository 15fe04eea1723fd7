use materna_backend::HttpBackend;
use materna_server::{build_router, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = materna_config::load()?;
    let backend = HttpBackend::new(&config.backend)?;
    let app = build_router(backend, &config.relay);

    let addr = format!("{}:{}", config.http.address, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "relay server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install shutdown handler");
        return;
    }
    info!("shutdown signal received");
}
