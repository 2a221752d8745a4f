use std::time::Duration;

use anyhow::Result;

use pricebot_core::Config;
use pricebot_server::build_app;
use pricebot_telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry("pricebot")?;
    let config = Config::from_env();
    let bind_addr: std::net::SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid BIND address {}: {err}", config.bind_addr))?;
    let grace = Duration::from_secs(config.shutdown_grace_seconds);

    let app = build_app(config).await?;
    tracing::info!("pricebot listening on {bind_addr}");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining job runner");
    app.runner.shutdown(grace).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
