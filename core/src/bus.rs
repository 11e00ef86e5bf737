//! `EventBus` abstraction and `PgEventBus`, a Postgres-table-backed
//! reference implementation. A production broker is out of scope here;
//! this stands in for local development and the integration test suite,
//! and is built the same "plain records + explicit SQL" way as the rest
//! of `core::db`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BusError;
use crate::events::DomainEvent;

/// One undelivered or in-flight message handed back to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub delivery_attempts: i32,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one event to `topic`. At-least-once: a transient failure
    /// here must be safe for the caller to retry with the same event.
    async fn publish(&self, topic: &str, event: &DomainEvent) -> Result<(), BusError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Leases the next undelivered (or expired-lease) message, if any.
    async fn subscribe_next(&self, topic: &str, subscription: &str) -> Result<Option<Delivery>, BusError>;

    /// Acknowledges successful processing.
    async fn ack(&self, message_id: &str) -> Result<(), BusError>;

    /// Signals processing failed; re-queues for redelivery (subject to
    /// `max_delivery_attempts`) or dead-letters the message.
    async fn nack(&self, message_id: &str, max_delivery_attempts: i32) -> Result<(), BusError>;
}

/// Marker trait for a complete bus implementation. Relayer binds to
/// `Publisher`, Indexer binds to `Subscriber`; components that need both
/// (the integration tests) can depend on `EventBus` directly.
pub trait EventBus: Publisher + Subscriber {}
impl<T: Publisher + Subscriber> EventBus for T {}

pub struct PgEventBus {
    pool: PgPool,
    ack_deadline: ChronoDuration,
}

impl PgEventBus {
    pub fn new(pool: PgPool, ack_deadline_secs: u64) -> Self {
        PgEventBus {
            pool,
            ack_deadline: ChronoDuration::seconds(ack_deadline_secs as i64),
        }
    }
}

#[async_trait]
impl Publisher for PgEventBus {
    async fn publish(&self, topic: &str, event: &DomainEvent) -> Result<(), BusError> {
        let payload = event
            .encode()
            .map_err(|e| BusError::Transient(format!("encode failed: {e}")))?;
        let message_id = Uuid::new_v4().to_string();
        let envelope = event.envelope();

        sqlx::query(
            "INSERT INTO bus_messages (message_id, event_id, event_type, topic, payload)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (topic, event_id) DO NOTHING",
        )
        .bind(&message_id)
        .bind(&envelope.event_id)
        .bind(event.event_type())
        .bind(topic)
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        metrics::counter!("events_published_total", "event_type" => event.event_type().to_string())
            .increment(1);
        Ok(())
    }
}

#[async_trait]
impl Subscriber for PgEventBus {
    async fn subscribe_next(&self, topic: &str, _subscription: &str) -> Result<Option<Delivery>, BusError> {
        let now: DateTime<Utc> = Utc::now();
        let new_deadline = now + self.ack_deadline;

        // Lease the oldest eligible message: never acked/dead-lettered,
        // and either never leased or its lease has expired.
        let row: Option<(String, String, String, Vec<u8>, i32)> = sqlx::query_as(
            "UPDATE bus_messages SET delivery_attempts = delivery_attempts + 1, ack_deadline = $3
             WHERE message_id = (
                 SELECT message_id FROM bus_messages
                 WHERE topic = $1 AND acked = FALSE AND dead_lettered = FALSE
                   AND (ack_deadline IS NULL OR ack_deadline < $2)
                 ORDER BY published_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING message_id, event_id, event_type, payload, delivery_attempts",
        )
        .bind(topic)
        .bind(now)
        .bind(new_deadline)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(message_id, event_id, event_type, payload, delivery_attempts)| Delivery {
            message_id,
            event_id,
            event_type,
            payload,
            delivery_attempts,
        }))
    }

    async fn ack(&self, message_id: &str) -> Result<(), BusError> {
        sqlx::query("UPDATE bus_messages SET acked = TRUE WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, message_id: &str, max_delivery_attempts: i32) -> Result<(), BusError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT delivery_attempts FROM bus_messages WHERE message_id = $1")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((attempts,)) = row else {
            return Ok(());
        };

        if attempts >= max_delivery_attempts {
            sqlx::query("UPDATE bus_messages SET dead_lettered = TRUE WHERE message_id = $1")
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            warn!(message_id, attempts, "message dead-lettered after exhausting retries");
            metrics::counter!("dead_letters_total").increment(1);
        } else {
            // Releasing the lease (ack_deadline = now) makes it eligible
            // for immediate redelivery; the caller's own backoff sleep
            // between nack and next poll provides the 1s..30s spacing.
            sqlx::query("UPDATE bus_messages SET ack_deadline = now() WHERE message_id = $1")
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            debug!(message_id, attempts, "message released for redelivery");
        }
        Ok(())
    }
}
