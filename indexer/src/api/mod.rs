//! Query API: read-only HTTP endpoints over the projection. Built with
//! `with_<dependency>()` filter injectors feeding into one `ApiServer`
//! that owns route assembly and `run()`; responses use a `{data, meta}`
//! / `{error}` envelope.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warp::Filter;

use crate::health::HealthState;

pub fn with_pool(pool: PgPool) -> impl Filter<Extract = (PgPool,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || pool.clone())
}

pub fn with_health(
    health: Arc<HealthState>,
) -> impl Filter<Extract = (Arc<HealthState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || health.clone())
}

pub struct ApiServer {
    addr: SocketAddr,
    pool: PgPool,
    health: Arc<HealthState>,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, pool: PgPool, health: Arc<HealthState>) -> Self {
        ApiServer { addr, pool, health }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(addr = %self.addr, "starting query API");
        let routes = self.create_routes();
        let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(self.addr, async move {
            cancel.cancelled().await;
        });
        server.await;
        Ok(())
    }

    pub fn create_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let pool = self.pool.clone();
        let health = self.health.clone();

        let health_route = warp::path("health")
            .and(warp::get())
            .and(with_health(health))
            .and_then(routes::health_handler);

        let stats = warp::path!("escrows" / "stats")
            .and(warp::get())
            .and(with_pool(pool.clone()))
            .and_then(routes::stats_handler);

        let by_role = warp::path!("escrows" / "by-role" / String)
            .and(warp::get())
            .and(with_pool(pool.clone()))
            .and_then(routes::by_role_handler);

        let by_payer = warp::path!("escrows" / "by-payer" / String)
            .and(warp::get())
            .and(warp::query::<routes::ListQuery>())
            .and(with_pool(pool.clone()))
            .and_then(|addr, q, pool| routes::by_field_handler(addr, q, pool, routes::AddressRole::Payer));

        let by_payee = warp::path!("escrows" / "by-payee" / String)
            .and(warp::get())
            .and(warp::query::<routes::ListQuery>())
            .and(with_pool(pool.clone()))
            .and_then(|addr, q, pool| routes::by_field_handler(addr, q, pool, routes::AddressRole::Payee));

        let by_arbiter = warp::path!("escrows" / "by-arbiter" / String)
            .and(warp::get())
            .and(warp::query::<routes::ListQuery>())
            .and(with_pool(pool.clone()))
            .and_then(|addr, q, pool| routes::by_field_handler(addr, q, pool, routes::AddressRole::Arbiter));

        let approvals = warp::path!("escrows" / String / "approvals")
            .and(warp::get())
            .and(with_pool(pool.clone()))
            .and_then(routes::approvals_handler);

        let events = warp::path!("escrows" / String / "events")
            .and(warp::get())
            .and(with_pool(pool.clone()))
            .and_then(routes::events_handler);

        let single = warp::path!("escrows" / String)
            .and(warp::get())
            .and(with_pool(pool.clone()))
            .and_then(routes::single_handler);

        health_route
            .or(stats)
            .or(by_role)
            .or(by_payer)
            .or(by_payee)
            .or(by_arbiter)
            .or(approvals)
            .or(events)
            .or(single)
            .recover(routes::handle_rejection)
    }
}
