//! Webhook endpoint handlers.
//!
//! The webhook handler reads the body as raw bytes so the exact signed payload
//! reaches the verifier and the downstream consumer. Responses never carry
//! internal error detail back to the provider.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::event::EventRecord;
use crate::pipeline::{InboundDelivery, PipelineError, PipelineOutcome, WebhookPipeline};
use crate::store::EventStore;
use crate::web::signature::SIGNATURE_HEADER;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: WebhookPipeline,
    pub store: Arc<dyn EventStore>,
}

impl AppState {
    pub fn new(config: Config, pipeline: WebhookPipeline, store: Arc<dyn EventStore>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
            store,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Provider Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub status: &'static str,
}

impl WebhookResponse {
    fn received(status: &'static str) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                received: true,
                status,
            }),
        )
    }

    fn refused(code: StatusCode, status: &'static str) -> (StatusCode, Json<Self>) {
        (
            code,
            Json(Self {
                received: false,
                status,
            }),
        )
    }
}

/// Payment provider webhook endpoint.
///
/// 200 for every accepted delivery, duplicates and failed forwards included.
/// 400 when the signature does not check out, so the provider retries on its
/// own schedule. 500 for operator-side faults.
pub async fn provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    info!(
        body_length = body.len(),
        has_signature = signature.is_some(),
        environment = %state.config.environment,
        "webhook_received"
    );

    match state
        .pipeline
        .handle(InboundDelivery::new(body, signature))
        .await
    {
        Ok(PipelineOutcome::Duplicate) => WebhookResponse::received("duplicate"),
        Ok(PipelineOutcome::Forwarded { .. })
        | Ok(PipelineOutcome::ForwardFailed { .. })
        | Ok(PipelineOutcome::Deferred) => WebhookResponse::received("received"),
        Err(PipelineError::Rejected(reason)) => {
            warn!(reason = %reason, "webhook_signature_rejected");
            WebhookResponse::refused(StatusCode::BAD_REQUEST, "rejected")
        }
        Err(PipelineError::Configuration(e)) => {
            error!(error = %e, "webhook_configuration_error");
            WebhookResponse::refused(StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
        Err(PipelineError::Persistence(e)) => {
            error!(error = %e, "webhook_persistence_error");
            WebhookResponse::refused(StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
    }
}

// =============================================================================
// Ledger Lookup
// =============================================================================

/// Look up a recorded event by provider id.
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventRecord>, StatusCode> {
    match state.store.get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(event_id = %id, error = %e, "ledger_lookup_failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ForwardMode;
    use crate::event::Environment;
    use crate::pipeline::PipelineSettings;
    use crate::relay::HttpForwarder;
    use crate::store::MemoryEventStore;
    use crate::web::router;
    use crate::web::signature::signature_header;

    const SECRET: &str = "whsec_handlers";

    fn config(forward_url: Option<String>) -> Config {
        Config {
            port: 0,
            environment: Environment::Test,
            forward_url,
            test_webhook_secret: Some(SECRET.to_string()),
            live_webhook_secret: None,
            webhook_tolerance_secs: 300,
            forward_timeout_ms: 2000,
            forward_mode: ForwardMode::Inline,
            database_url: "sqlite::memory:".to_string(),
        }
    }

    fn state(config: Config) -> (AppState, Arc<MemoryEventStore>) {
        let store = Arc::new(MemoryEventStore::new());
        let forwarder = Arc::new(HttpForwarder::new(config.forward_timeout()).unwrap());
        let pipeline =
            WebhookPipeline::new(store.clone(), forwarder, PipelineSettings::from(&config));
        (AppState::new(config, pipeline, store.clone()), store)
    }

    fn webhook_request(body: &'static str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/stripe")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(body)).unwrap()
    }

    const BODY: &str = r#"{"id":"evt_web","type":"invoice.paid","livemode":false}"#;

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state(config(None));
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_signature_is_400() {
        let (state, store) = state(config(Some("http://127.0.0.1:1/hook".to_string())));
        let sig = signature_header(BODY.as_bytes(), "whsec_wrong", chrono::Utc::now().timestamp())
            .unwrap();

        let response = router(state)
            .oneshot(webhook_request(BODY, Some(sig)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_is_400() {
        let (state, _) = state(config(Some("http://127.0.0.1:1/hook".to_string())));
        let response = router(state)
            .oneshot(webhook_request(BODY, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_forward_url_is_500() {
        let (state, store) = state(config(None));
        let sig = signature_header(BODY.as_bytes(), SECRET, chrono::Utc::now().timestamp())
            .unwrap();

        let response = router(state)
            .oneshot(webhook_request(BODY, Some(sig)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_consumer_still_acknowledged() {
        let (state, store) = state(config(Some("http://127.0.0.1:1/hook".to_string())));
        let sig = signature_header(BODY.as_bytes(), SECRET, chrono::Utc::now().timestamp())
            .unwrap();

        let response = router(state.clone())
            .oneshot(webhook_request(BODY, Some(sig)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.has_seen("evt_web").await.unwrap());

        let lookup = router(state)
            .oneshot(
                Request::builder()
                    .uri("/events/evt_web")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(lookup.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_event_lookup_is_404() {
        let (state, _) = state(config(None));
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/events/evt_nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
