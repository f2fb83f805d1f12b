//! Process-local ledger backed by a concurrent map.
//!
//! Suitable for tests and single-process deployments only.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{EventStore, RecordResult, StoreError};
use crate::event::{EventRecord, WebhookEvent};

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    records: DashMap<String, EventRecord>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn has_seen(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(id))
    }

    async fn record_once(&self, event: &WebhookEvent) -> Result<RecordResult, StoreError> {
        // The entry guard holds the shard lock, so check and insert are one step
        let created = match self.records.entry(event.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(EventRecord::from_event(event, Utc::now()));
                true
            }
        };
        Ok(RecordResult { created })
    }

    async fn get(&self, id: &str) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Bytes;

    use super::*;

    fn event(id: &str) -> WebhookEvent {
        WebhookEvent {
            id: id.to_string(),
            event_type: "payment_intent.succeeded".to_string(),
            livemode: false,
            raw_payload: Bytes::from_static(b"{}"),
            signature_header: "t=1,v1=00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_once_is_idempotent() {
        let store = MemoryEventStore::new();

        assert!(!store.has_seen("evt_1").await.unwrap());
        assert!(store.record_once(&event("evt_1")).await.unwrap().created);
        assert!(!store.record_once(&event("evt_1")).await.unwrap().created);
        assert!(store.has_seen("evt_1").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_record_keeps_first_sighting() {
        let store = MemoryEventStore::new();
        store.record_once(&event("evt_1")).await.unwrap();
        let first = store.get("evt_1").await.unwrap().unwrap();

        let mut again = event("evt_1");
        again.event_type = "charge.refunded".to_string();
        store.record_once(&again).await.unwrap();

        assert_eq!(store.get("evt_1").await.unwrap().unwrap(), first);
        assert_eq!(first.event_type, "payment_intent.succeeded");
        assert!(store.get("evt_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_record_once_creates_exactly_one() {
        let store = Arc::new(MemoryEventStore::new());

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.record_once(&event("evt_race")).await })
            })
            .collect();

        let created = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().as_ref().unwrap().created)
            .count();

        assert_eq!(created, 1);
        assert_eq!(store.len(), 1);
    }
}
