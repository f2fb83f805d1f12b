//! PayRelay - signature-verified, idempotent relay for payment webhooks.
//!
//! Each inbound delivery is verified against the environment's signing
//! secret, recorded once in the idempotency ledger, and forwarded unchanged
//! to the configured downstream consumer.
//!
//! ## Architecture
//!
//! ```text
//! Provider → Web Server → verify → ledger (insert-if-absent) → forward → Consumer
//! ```

pub mod config;
pub mod event;
pub mod pipeline;
pub mod relay;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigurationError, ForwardMode};
pub use event::{Environment, EventRecord, RelayTarget, WebhookEvent};
pub use pipeline::{
    ForwardFailure, InboundDelivery, PipelineError, PipelineOutcome, PipelineSettings,
    WebhookPipeline,
};
pub use relay::{ForwardError, ForwardReceipt, Forwarder, HttpForwarder};
pub use store::{EventStore, MemoryEventStore, RecordResult, SqlEventStore, StoreError};
pub use web::AppState;
