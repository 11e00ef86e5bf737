//! Subscriber: pulls messages off the bus, decodes, hands each to the
//! [`ProjectionEngine`], and acks/nacks accordingly. Safe to run with
//! concurrency N > 1 — the DB's per-row lock is the only serialization
//! point, so workers here never coordinate with each other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use escrow_core::db::ApplyOutcome;
use escrow_core::events::DomainEvent;
use escrow_core::{ProjectionEngine, Subscriber as _};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::health::HealthState;

pub struct SubscriberWorker {
    id: usize,
    bus: Arc<dyn escrow_core::Subscriber>,
    engine: Arc<ProjectionEngine>,
    health: Arc<HealthState>,
    topic: String,
    subscription: String,
    max_delivery_attempts: i32,
    idle_poll_interval: Duration,
}

impl SubscriberWorker {
    pub fn new(
        id: usize,
        bus: Arc<dyn escrow_core::Subscriber>,
        engine: Arc<ProjectionEngine>,
        health: Arc<HealthState>,
        topic: String,
        subscription: String,
        max_delivery_attempts: i32,
    ) -> Self {
        SubscriberWorker {
            id,
            bus,
            engine,
            health,
            topic,
            subscription,
            max_delivery_attempts,
            idle_poll_interval: Duration::from_millis(500),
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                info!(worker = self.id, "subscriber worker draining, no new messages");
                return;
            }

            match self.bus.subscribe_next(&self.topic, &self.subscription).await {
                Ok(Some(delivery)) => {
                    self.process_one(delivery).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_poll_interval) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
                Err(e) => {
                    warn!(worker = self.id, error = %e, "failed to pull from bus, backing off");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    async fn process_one(&self, delivery: escrow_core::Delivery) {
        let started = Instant::now();

        let event = match DomainEvent::decode(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                // Undecodable payload on a message the bus already
                // accepted is a codec bug, not a transient broker issue —
                // dead-letter it immediately rather than retrying forever.
                error!(
                    worker = self.id,
                    message_id = %delivery.message_id,
                    error = %e,
                    "undecodable message, dead-lettering"
                );
                let _ = self.bus.nack(&delivery.message_id, 0).await;
                return;
            }
        };

        match self.engine.apply(&event).await {
            Ok(outcome) => {
                if let Err(e) = self.bus.ack(&delivery.message_id).await {
                    warn!(worker = self.id, error = %e, "ack failed, message may be redelivered");
                }
                info!(
                    worker = self.id,
                    event_id = %event.envelope().event_id,
                    event_type = event.event_type(),
                    outcome = outcome.as_str(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "projected event"
                );
                if matches!(outcome, ApplyOutcome::Applied | ApplyOutcome::OutOfOrderBuffered) {
                    metrics::histogram!("projection_latency_ms").record(started.elapsed().as_millis() as f64);
                    self.health.mark_event_applied();
                }
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    message_id = %delivery.message_id,
                    error = %e,
                    "projection failed, nacking for redelivery"
                );
                let _ = self.bus.nack(&delivery.message_id, self.max_delivery_attempts).await;
            }
        }
    }
}
