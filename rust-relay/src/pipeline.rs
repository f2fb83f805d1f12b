//! Webhook ingestion pipeline.
//!
//! ```text
//! RECEIVED → policy gate → VERIFYING → VERIFIED → record_once
//!     created=false → DUPLICATE → ack
//!     created=true  → FORWARDING → FORWARDED → ack
//!                               → FORWARD_FAILED → ack + operator alert
//! ```
//!
//! Recording always happens before forwarding, so a failed forward is this
//! relay's delivery gap and never a reason to make the provider redeliver.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigurationError, ForwardMode, DEFAULT_TOLERANCE_SECS};
use crate::event::{Environment, RelayTarget, WebhookEvent};
use crate::relay::{ForwardError, Forwarder};
use crate::store::{EventStore, StoreError};
use crate::web::signature::{self, VerificationError};

/// Capacity of the operator alert channel.
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Settings the pipeline needs, resolved from [`Config`] once at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub environment: Environment,
    pub secret: Option<String>,
    pub forward_url: Option<String>,
    pub tolerance: Duration,
    pub forward_mode: ForwardMode,
}

impl PipelineSettings {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            secret: None,
            forward_url: None,
            tolerance: Duration::from_secs(DEFAULT_TOLERANCE_SECS),
            forward_mode: ForwardMode::Inline,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_forward_url(mut self, url: impl Into<String>) -> Self {
        self.forward_url = Some(url.into());
        self
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_forward_mode(mut self, mode: ForwardMode) -> Self {
        self.forward_mode = mode;
        self
    }

    /// Relay target after the transport policy check.
    pub fn relay_target(&self) -> Result<RelayTarget, ConfigurationError> {
        let url = self
            .forward_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigurationError::MissingRelayTarget)?;

        let target = RelayTarget::new(url, self.environment);
        target.validate()?;
        Ok(target)
    }

    fn secret(&self) -> Result<&str, ConfigurationError> {
        self.secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigurationError::MissingSecret(self.environment))
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            environment: config.environment,
            secret: config.webhook_secret().map(str::to_string),
            forward_url: config.forward_url.clone(),
            tolerance: config.tolerance(),
            forward_mode: config.forward_mode,
        }
    }
}

/// A delivery as it arrived at the HTTP boundary.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    pub raw_payload: Bytes,
    pub signature_header: Option<String>,
}

impl InboundDelivery {
    pub fn new(raw_payload: Bytes, signature_header: Option<String>) -> Self {
        Self {
            raw_payload,
            signature_header,
        }
    }
}

/// How an accepted delivery finished. Every variant is acknowledged to the
/// sender as received.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// New event, delivered downstream
    Forwarded { status: u16 },
    /// Event id already in the ledger; nothing forwarded
    Duplicate,
    /// New event recorded but downstream delivery failed
    ForwardFailed { error: ForwardError },
    /// New event recorded; delivery continues on a background task
    Deferred,
}

/// Why a delivery was not accepted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("delivery rejected: {0}")]
    Rejected(#[from] VerificationError),

    #[error("ledger error: {0}")]
    Persistence(#[from] StoreError),
}

/// Published on the alert channel whenever a recorded event could not be
/// delivered downstream.
#[derive(Debug, Clone)]
pub struct ForwardFailure {
    pub event_id: String,
    pub event_type: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct WebhookPipeline {
    store: Arc<dyn EventStore>,
    forwarder: Arc<dyn Forwarder>,
    settings: Arc<PipelineSettings>,
    alerts: broadcast::Sender<ForwardFailure>,
}

impl WebhookPipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        forwarder: Arc<dyn Forwarder>,
        settings: PipelineSettings,
    ) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            store,
            forwarder,
            settings: Arc::new(settings),
            alerts,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Subscribe to forward failures for operator alerting.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<ForwardFailure> {
        self.alerts.subscribe()
    }

    /// Run one delivery through the pipeline.
    pub async fn handle(
        &self,
        delivery: InboundDelivery,
    ) -> Result<PipelineOutcome, PipelineError> {
        // Fail closed before touching the payload or the network
        let target = self.settings.relay_target()?;
        let secret = self.settings.secret()?;

        let event = signature::verify(
            &delivery.raw_payload,
            delivery.signature_header.as_deref(),
            secret,
            self.settings.tolerance,
        )
        .map_err(|e| match e {
            VerificationError::ConfigurationMissing => PipelineError::Configuration(
                ConfigurationError::MissingSecret(self.settings.environment),
            ),
            other => PipelineError::Rejected(other),
        })?;

        if event.livemode != (self.settings.environment == Environment::Live) {
            warn!(
                event_id = %event.id,
                livemode = event.livemode,
                environment = %self.settings.environment,
                "webhook_environment_mismatch"
            );
        }

        let recorded = self.store.record_once(&event).await?;
        if !recorded.created {
            info!(event_id = %event.id, event_type = %event.event_type, "webhook_duplicate");
            return Ok(PipelineOutcome::Duplicate);
        }

        info!(event_id = %event.id, event_type = %event.event_type, "webhook_recorded");

        match self.settings.forward_mode {
            ForwardMode::Inline => {
                Ok(deliver(self.forwarder.as_ref(), &self.alerts, &target, &event).await)
            }
            ForwardMode::Background => {
                let forwarder = Arc::clone(&self.forwarder);
                let alerts = self.alerts.clone();
                tokio::spawn(async move {
                    deliver(forwarder.as_ref(), &alerts, &target, &event).await;
                });
                Ok(PipelineOutcome::Deferred)
            }
        }
    }
}

async fn deliver(
    forwarder: &dyn Forwarder,
    alerts: &broadcast::Sender<ForwardFailure>,
    target: &RelayTarget,
    event: &WebhookEvent,
) -> PipelineOutcome {
    match forwarder
        .forward(target, &event.raw_payload, &event.signature_header, Some(event))
        .await
    {
        Ok(receipt) => {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                status_code = receipt.status,
                "webhook_forwarded"
            );
            PipelineOutcome::Forwarded {
                status: receipt.status,
            }
        }
        Err(e) => {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "webhook_forward_failed"
            );
            // No subscribers is fine; the error log above still stands
            let _ = alerts.send(ForwardFailure {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                error: e.to_string(),
                failed_at: Utc::now(),
            });
            PipelineOutcome::ForwardFailed { error: e }
        }
    }
}
