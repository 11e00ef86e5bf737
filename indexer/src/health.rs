//! `/health` readiness: 200 iff the DB is reachable, the bus
//! subscription is attached, and either the last applied event is
//! recent or there's simply nothing new to apply.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;

pub struct HealthState {
    pool: PgPool,
    stale_threshold: Duration,
    last_applied_at: AtomicI64,
    subscription_attached: std::sync::atomic::AtomicBool,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub db_reachable: bool,
    pub subscription_attached: bool,
    pub seconds_since_last_event: Option<i64>,
}

impl HealthState {
    pub fn new(pool: PgPool, stale_threshold: Duration) -> Arc<Self> {
        Arc::new(HealthState {
            pool,
            stale_threshold,
            last_applied_at: AtomicI64::new(Utc::now().timestamp()),
            subscription_attached: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn mark_event_applied(&self) {
        self.last_applied_at.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn mark_subscription_attached(&self, attached: bool) {
        self.subscription_attached.store(attached, Ordering::Relaxed);
    }

    pub async fn check(&self) -> HealthReport {
        let db_reachable = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        let subscription_attached = self.subscription_attached.load(Ordering::Relaxed);

        let last_applied = self.last_applied_at.load(Ordering::Relaxed);
        let seconds_since = Utc::now().timestamp() - last_applied;
        let fresh = seconds_since <= self.stale_threshold.as_secs() as i64;

        HealthReport {
            healthy: db_reachable && subscription_attached && fresh,
            db_reachable,
            subscription_attached,
            seconds_since_last_event: Some(seconds_since),
        }
    }
}
