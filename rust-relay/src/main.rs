//! PayRelay Web Server - receives provider webhooks and relays them downstream.
//!
//! This binary:
//! - Verifies each delivery's signature with the active environment's secret
//! - Records the event id once in the SQLite ledger
//! - Forwards the untouched body and signature to the configured consumer

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use payrelay::pipeline::PipelineSettings;
use payrelay::web::{router, AppState};
use payrelay::{Config, HttpForwarder, SqlEventStore, WebhookPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        environment = %config.environment,
        forward_url_set = config.forward_url.is_some(),
        test_secret_configured = config.test_webhook_secret.is_some(),
        live_secret_configured = config.live_webhook_secret.is_some(),
        tolerance_seconds = config.webhook_tolerance_secs,
        forward_timeout_ms = config.forward_timeout_ms,
        forward_mode = ?config.forward_mode,
        "config_loaded"
    );

    let settings = PipelineSettings::from(&config);

    // Requests fail closed on their own; this only makes the problem visible early
    if let Err(e) = settings.relay_target() {
        warn!(error = %e, "relay_target_invalid");
    }
    if config.webhook_secret().is_none() {
        warn!(environment = %config.environment, "webhook_secret_missing");
    }

    let store = SqlEventStore::connect(&config.database_url)
        .await
        .context("Failed to open ledger database")?;
    store
        .migrate()
        .await
        .context("Failed to prepare ledger schema")?;
    let store = Arc::new(store);

    let forwarder = HttpForwarder::new(config.forward_timeout())
        .context("Failed to create HTTP client")?;

    let pipeline = WebhookPipeline::new(store.clone(), Arc::new(forwarder), settings);
    let state = AppState::new(config.clone(), pipeline, store.clone());

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    store.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
