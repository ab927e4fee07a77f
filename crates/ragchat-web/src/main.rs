//! ragchat-web — Axum web server entry point.
//! Loads config, creates the default chat session, serves the API.

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use ragchat_core::config::Config;

use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let config = match Config::load_from_dir(&project_root) {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default config: {:#}", e);
            Config::default()
        }
    };

    info!(
        "Bot host={} model={} timeout={}s fallback={:?}",
        config.bot.host,
        config.bot.model_name(),
        config.invocation.timeout_secs,
        config.invocation.fallback
    );

    let state = Arc::new(AppState::new(config));
    let app = server::router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = format!("0.0.0.0:{}", port);

    eprintln!("\n  Chat API listening on http://localhost:{}\n", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Server stopped.");
    Ok(())
}
