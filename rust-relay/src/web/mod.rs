//! Web server module for receiving provider webhooks.
//!
//! This module provides a thin web server that:
//! - Receives signed webhook deliveries with the raw body intact
//! - Runs each delivery through the ingestion pipeline
//! - Exposes the ledger for operator lookups

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{get_event, health, provider_webhook, AppState, HealthResponse, WebhookResponse};
pub use signature::{verify, VerificationError, SIGNATURE_HEADER};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(provider_webhook))
        .route("/events/:id", get(get_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
