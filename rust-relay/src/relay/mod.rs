//! Delivery of verified events to the downstream consumer.
//!
//! Exactly one attempt per call. Retries, if any, belong to whoever operates
//! the relay.

pub mod forwarder;

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use thiserror::Error;

use crate::event::{RelayTarget, WebhookEvent};

pub use forwarder::HttpForwarder;

/// Header carrying the forwarded event id.
pub const EVENT_ID_HEADER: &str = "X-Webhook-Event-Id";

/// Header carrying the forwarded event type.
pub const EVENT_TYPE_HEADER: &str = "X-Webhook-Event-Type";

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("downstream responded with status {0}")]
    Status(u16),

    #[error("downstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardReceipt {
    pub status: u16,
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    /// POST `raw_payload` unchanged to `target`, carrying the original
    /// signature header.
    async fn forward(
        &self,
        target: &RelayTarget,
        raw_payload: &Bytes,
        signature_header: &str,
        event: Option<&WebhookEvent>,
    ) -> Result<ForwardReceipt, ForwardError>;
}
