//! Idempotency ledger for verified webhook events.
//!
//! One record per provider event id, created on first sighting and never
//! updated. The uniqueness guarantee lives in the backing store itself so that
//! several relay processes can share one ledger.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{EventRecord, WebhookEvent};

pub use memory::MemoryEventStore;
pub use sql::SqlEventStore;

/// Ledger failures. Always fatal to the request that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordResult {
    /// True only for the caller whose insert created the record
    pub created: bool,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Whether a record exists for `id`.
    async fn has_seen(&self, id: &str) -> Result<bool, StoreError>;

    /// Atomically create the record for `event` unless one already exists.
    ///
    /// Under concurrent calls with the same id exactly one caller observes
    /// `created == true`.
    async fn record_once(&self, event: &WebhookEvent) -> Result<RecordResult, StoreError>;

    /// Fetch the record for `id`, if any.
    async fn get(&self, id: &str) -> Result<Option<EventRecord>, StoreError>;
}
