//! SQLite-backed ledger.
//!
//! `provider_id` is the table's primary key and inserts use
//! `ON CONFLICT DO NOTHING`, so the database decides which concurrent
//! delivery wins. No read-then-write happens on the insert path.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{EventStore, RecordResult, StoreError};
use crate::event::{EventRecord, WebhookEvent};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_events (
    provider_id TEXT PRIMARY KEY NOT NULL,
    event_type  TEXT NOT NULL,
    livemode    BOOLEAN NOT NULL,
    recorded_at TEXT NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct SqlEventStore {
    pool: SqlitePool,
}

impl SqlEventStore {
    /// Open (creating if needed) the ledger at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // Each connection to an in-memory database is a separate database
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        info!(in_memory = url.contains(":memory:"), "ledger_connected");

        Ok(Self { pool })
    }

    /// Create the ledger table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        info!("ledger_schema_ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl EventStore for SqlEventStore {
    async fn has_seen(&self, id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM webhook_events WHERE provider_id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn record_once(&self, event: &WebhookEvent) -> Result<RecordResult, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (provider_id, event_type, livemode, recorded_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (provider_id) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.livemode)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(RecordResult {
            created: result.rows_affected() == 1,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<EventRecord>, StoreError> {
        let row: Option<(String, String, bool, DateTime<Utc>)> = sqlx::query_as(
            "SELECT provider_id, event_type, livemode, recorded_at FROM webhook_events WHERE provider_id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(provider_id, event_type, livemode, recorded_at)| EventRecord {
            provider_id,
            event_type,
            livemode,
            recorded_at,
        }))
    }
}
