mod api_doc;
mod config;
mod error;
mod handlers;
mod models;
mod routes;
mod spanner;
mod state;
mod store;

use anyhow::Context;
use config::{Backend, Config};
use spanner::SpannerStore;
use state::AppState;
use std::sync::Arc;
use store::{MemoryStore, Store};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("attendance-gateway starting");

    let config = Config::from_env()?;
    config.log_startup();

    let store: Arc<dyn Store> = match (&config.backend, &config.spanner) {
        (Backend::Spanner, Some(spanner)) => Arc::new(SpannerStore::from_config(spanner).await?),
        (Backend::Spanner, None) => anyhow::bail!("Spanner backend selected without Spanner settings"),
        (Backend::Memory, _) => {
            tracing::warn!("Using in-memory store; data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = config.bind_addr();
    let state = AppState {
        store,
        config: Arc::new(config),
    };
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("attendance-gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
