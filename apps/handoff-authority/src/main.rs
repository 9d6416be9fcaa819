use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use handoff_authority::config::{Cli, ServerConfig};
use handoff_authority::routes;
use handoff_authority::state::AppState;
use handoff_authority::store::{self, StoreSettings};
use handoff_authority::telemetry::init_tracing;
use handoff_core::SystemClock;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    init_tracing(&config.log_filter);

    let store = store::build_store(
        StoreSettings {
            backend: config.store,
            redis_url: config.redis_url.as_deref(),
            token_ttl: config.token_ttl,
        },
        Arc::new(SystemClock),
    )
    .await;
    let app = routes::router(AppState::new(store, config.public_origin.clone()));

    info!(
        addr = %config.listen_addr,
        store = ?config.store,
        redis = %config.redis_url.as_deref().unwrap_or("unset"),
        token_ttl_secs = config.token_ttl.whole_seconds(),
        public_origin = %config.public_origin.origin(),
        "starting handoff-authority"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
