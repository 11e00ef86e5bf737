//! Projection Engine: applies domain events to the SQL projection inside
//! one transaction per event, keyed by `escrow_address` with a
//! `SELECT ... FOR UPDATE` row lock as the serialization point. No ORM —
//! hand-written parameterized SQL.
//!
//! Status is derived as a pure function of the *set* of facts observed
//! for an escrow (rather than stepped transition-by-transition), which is
//! what makes arrival-order independence and determinism true by
//! construction instead of by careful bookkeeping.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::error::ProjectionError;
use crate::events::DomainEvent;

use super::models::EscrowStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    SkippedDuplicate,
    OutOfOrderBuffered,
    Rejected,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::SkippedDuplicate => "skipped_duplicate",
            ApplyOutcome::OutOfOrderBuffered => "out_of_order_buffered",
            ApplyOutcome::Rejected => "rejected",
        }
    }
}

pub struct ProjectionEngine {
    pool: PgPool,
}

/// The facts observed so far for one escrow, used to derive `status` as a
/// pure function (see module docs).
struct ObservedFacts {
    created: bool,
    approvals_count: i64,
    approvals_required: i32,
    released_seen: bool,
    refunded_seen: bool,
}

impl ObservedFacts {
    fn derive_status(&self) -> EscrowStatus {
        let approved_threshold = self.created && self.approvals_count >= self.approvals_required as i64;
        if self.refunded_seen && self.created {
            EscrowStatus::Refunded
        } else if self.released_seen && approved_threshold {
            EscrowStatus::Released
        } else if approved_threshold {
            EscrowStatus::Approved
        } else if self.created {
            EscrowStatus::Created
        } else {
            EscrowStatus::Deployed
        }
    }
}

impl ProjectionEngine {
    pub fn new(pool: PgPool) -> Self {
        ProjectionEngine { pool }
    }

    /// Applies one event. Returns the outcome so the caller (Subscriber
    /// or Backfill Runner) can ack/nack/log accordingly.
    pub async fn apply(&self, event: &DomainEvent) -> Result<ApplyOutcome, ProjectionError> {
        let mut txn = self.pool.begin().await?;
        let outcome = self.apply_in_txn(&mut txn, event).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    async fn apply_in_txn(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        event: &DomainEvent,
    ) -> Result<ApplyOutcome, ProjectionError> {
        let envelope = event.envelope();
        let escrow_address = event.escrow_address().to_string();
        let chain_id = envelope.chain_id as i64;

        // event_id is the deduplication key.
        let already_seen: Option<(String,)> =
            sqlx::query_as("SELECT event_id FROM escrow_events WHERE event_id = $1")
                .bind(&envelope.event_id)
                .fetch_optional(&mut **txn)
                .await?;
        if already_seen.is_some() {
            return Ok(ApplyOutcome::SkippedDuplicate);
        }

        // Upsert a minimal row and take the per-row lock — this is the
        // serialization point that makes concurrent applies to the same
        // escrow safe.
        sqlx::query(
            "INSERT INTO escrows (escrow_address, chain_id, status, last_event_block, last_event_log_index)
             VALUES ($1, $2, 'deployed', 0, 0)
             ON CONFLICT (escrow_address) DO NOTHING",
        )
        .bind(&escrow_address)
        .bind(chain_id)
        .execute(&mut **txn)
        .await?;

        sqlx::query("SELECT escrow_address FROM escrows WHERE escrow_address = $1 FOR UPDATE")
            .bind(&escrow_address)
            .fetch_one(&mut **txn)
            .await?;

        let before = self.observed_facts(txn, &escrow_address).await?;
        let old_status = before.derive_status();

        self.apply_side_effects(txn, event).await?;
        self.advance_watermark(txn, &escrow_address, envelope.block_number, envelope.log_index)
            .await?;

        let mut after = self.observed_facts(txn, &escrow_address).await?;
        // The current event's own audit row isn't written until
        // `insert_audit_row` below, so a release/refund wouldn't otherwise
        // be counted in its own `apply()` — fold it in directly.
        after.released_seen |= matches!(event, DomainEvent::EscrowReleased { .. });
        after.refunded_seen |= matches!(event, DomainEvent::EscrowRefunded { .. });
        let new_status = after.derive_status();

        let outcome = if old_status.is_terminal() {
            ApplyOutcome::Rejected
        } else if new_status != old_status {
            ApplyOutcome::Applied
        } else {
            // The event carried new facts (we always insert/ update
            // something) but status didn't move — the event is waiting
            // on a predecessor that hasn't arrived yet.
            ApplyOutcome::OutOfOrderBuffered
        };

        sqlx::query(
            "UPDATE escrows SET approvals_count = $1, status = $2, updated_at = now() WHERE escrow_address = $3",
        )
        .bind(after.approvals_count as i32)
        .bind(&new_status)
        .bind(&escrow_address)
        .execute(&mut **txn)
        .await?;

        if outcome == ApplyOutcome::Rejected {
            warn!(
                event_id = %envelope.event_id,
                event_type = event.event_type(),
                escrow_address = %escrow_address,
                "rejected event against terminal escrow"
            );
            metrics::counter!("events_projected_total", "event_type" => event.event_type().to_string(), "outcome" => "rejected").increment(1);
        } else {
            metrics::counter!("events_projected_total", "event_type" => event.event_type().to_string(), "outcome" => outcome.as_str()).increment(1);
        }

        self.insert_audit_row(txn, event, outcome).await?;

        info!(
            event_id = %envelope.event_id,
            event_type = event.event_type(),
            escrow_address = %escrow_address,
            outcome = outcome.as_str(),
            "projected event"
        );

        Ok(outcome)
    }

    async fn observed_facts(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        escrow_address: &str,
    ) -> Result<ObservedFacts, ProjectionError> {
        let row: (Option<String>, i32) = sqlx::query_as(
            "SELECT payer, approvals_required FROM escrows WHERE escrow_address = $1",
        )
        .bind(escrow_address)
        .fetch_one(&mut **txn)
        .await?;
        let (payer, approvals_required) = row;

        let (approvals_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM approvals WHERE escrow_address = $1")
                .bind(escrow_address)
                .fetch_one(&mut **txn)
                .await?;

        let (released_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM escrow_events WHERE escrow_address = $1 AND event_type = 'EscrowReleased'",
        )
        .bind(escrow_address)
        .fetch_one(&mut **txn)
        .await?;

        let (refunded_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM escrow_events WHERE escrow_address = $1 AND event_type = 'EscrowRefunded'",
        )
        .bind(escrow_address)
        .fetch_one(&mut **txn)
        .await?;

        Ok(ObservedFacts {
            created: payer.is_some(),
            approvals_count,
            approvals_required,
            released_seen: released_count > 0,
            refunded_seen: refunded_count > 0,
        })
    }

    async fn apply_side_effects(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        event: &DomainEvent,
    ) -> Result<(), ProjectionError> {
        match event {
            DomainEvent::EscrowDeployed { envelope, .. } => {
                sqlx::query(
                    "UPDATE escrows SET
                        deploy_tx = COALESCE(deploy_tx, $1),
                        deploy_block = COALESCE(deploy_block, $2)
                     WHERE escrow_address = $3",
                )
                .bind(&envelope.tx_hash)
                .bind(envelope.block_number as i64)
                .bind(event.escrow_address())
                .execute(&mut **txn)
                .await?;
            }
            DomainEvent::EscrowCreated { payload, .. } => {
                let amount = BigDecimal::from_str(&payload.amount)
                    .unwrap_or_else(|_| BigDecimal::from(0));
                sqlx::query(
                    "UPDATE escrows SET
                        payer = $1,
                        payee = $2,
                        arbiter = NULLIF($3, ''),
                        asset = $4,
                        amount = $5,
                        approvals_required = $6
                     WHERE escrow_address = $7",
                )
                .bind(&payload.payer)
                .bind(&payload.payee)
                .bind(&payload.arbiter)
                .bind(&payload.asset)
                .bind(amount)
                .bind(payload.approvals_required as i32)
                .bind(&payload.escrow_address)
                .execute(&mut **txn)
                .await?;
            }
            DomainEvent::Approved { envelope, payload } => {
                sqlx::query(
                    "INSERT INTO approvals (escrow_address, approver, tx_hash, block_number, block_timestamp)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (escrow_address, approver) DO NOTHING",
                )
                .bind(&payload.escrow_address)
                .bind(&payload.approver)
                .bind(&envelope.tx_hash)
                .bind(envelope.block_number as i64)
                .bind(envelope.block_timestamp)
                .execute(&mut **txn)
                .await?;
            }
            DomainEvent::EscrowReleased { .. } | DomainEvent::EscrowRefunded { .. } => {
                // Settlement fields (`to`, `amount`) are preserved in the
                // escrow_events audit row; §3.2 doesn't carry a settlement
                // destination column on `escrows` itself.
            }
        }
        Ok(())
    }

    async fn advance_watermark(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        escrow_address: &str,
        block_number: u64,
        log_index: u64,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            "UPDATE escrows SET
                last_event_block = GREATEST(last_event_block, $1),
                last_event_log_index = CASE
                    WHEN $1 > last_event_block THEN $2
                    WHEN $1 = last_event_block THEN GREATEST(last_event_log_index, $2)
                    ELSE last_event_log_index
                END
             WHERE escrow_address = $3",
        )
        .bind(block_number as i64)
        .bind(log_index as i64)
        .bind(escrow_address)
        .execute(&mut **txn)
        .await?;
        Ok(())
    }

    async fn insert_audit_row(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        event: &DomainEvent,
        outcome: ApplyOutcome,
    ) -> Result<(), ProjectionError> {
        let envelope = event.envelope();
        let payload_json = serde_json::to_value(PayloadView(event)).unwrap_or(serde_json::Value::Null);

        sqlx::query(
            "INSERT INTO escrow_events
                (event_id, event_type, chain_id, block_number, block_hash, tx_hash, log_index,
                 block_timestamp, contract_address, escrow_address, payload_json, outcome)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(&envelope.event_id)
        .bind(event.event_type())
        .bind(envelope.chain_id as i64)
        .bind(envelope.block_number as i64)
        .bind(&envelope.block_hash)
        .bind(&envelope.tx_hash)
        .bind(envelope.log_index as i64)
        .bind(envelope.block_timestamp)
        .bind(&envelope.contract_address)
        .bind(event.escrow_address())
        .bind(payload_json)
        .bind(outcome.as_str())
        .execute(&mut **txn)
        .await?;
        Ok(())
    }
}

/// Helper so `escrow_events.payload_json` stores exactly the typed
/// payload, independent of the envelope fields already materialized in
/// their own columns.
struct PayloadView<'a>(&'a DomainEvent);

impl<'a> serde::Serialize for PayloadView<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.0 {
            DomainEvent::EscrowDeployed { payload, .. } => payload.serialize(serializer),
            DomainEvent::EscrowCreated { payload, .. } => payload.serialize(serializer),
            DomainEvent::Approved { payload, .. } => payload.serialize(serializer),
            DomainEvent::EscrowReleased { payload, .. } => payload.serialize(serializer),
            DomainEvent::EscrowRefunded { payload, .. } => payload.serialize(serializer),
        }
    }
}

impl EscrowStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}
