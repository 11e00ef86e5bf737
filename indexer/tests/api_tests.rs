//! Query API tests against a real Postgres instance and a `warp::test`
//! in-process request, following the same `ESCROW_TEST_DATABASE_URL`
//! escape hatch as `escrow-core`'s projection tests.

use escrow_core::db::ProjectionEngine;
use escrow_core::events::{ApprovedPayload, DomainEvent, Envelope, EscrowCreatedPayload, EscrowDeployedPayload};
use escrow_indexer::api::ApiServer;
use escrow_indexer::HealthState;
use sqlx::PgPool;
use std::time::Duration;

const ESCROW: &str = "0xe1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1";
const PAYER: &str = "0xa0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0";
const CHAIN_ID: u64 = 11155111;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("ESCROW_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("connect to test database");
    sqlx::migrate!("../core/migrations").run(&pool).await.expect("run migrations");
    sqlx::query("TRUNCATE escrows, approvals, escrow_events, bus_messages CASCADE")
        .execute(&pool)
        .await
        .expect("truncate");
    Some(pool)
}

fn envelope(block: u64, log_index: u64) -> Envelope {
    Envelope {
        event_id: Envelope::compute_event_id(CHAIN_ID, &format!("0x{:064x}", block), log_index),
        chain_id: CHAIN_ID,
        block_number: block,
        block_hash: format!("0x{:064x}", block),
        tx_hash: format!("0x{:064x}", block),
        log_index,
        block_timestamp: 1_700_000_000 + block as i64,
        contract_address: "0xcccc000000000000000000000000000000000c".to_string(),
    }
}

async fn seed_one_escrow(pool: &PgPool) {
    let engine = ProjectionEngine::new(pool.clone());
    engine
        .apply(&DomainEvent::EscrowDeployed {
            envelope: envelope(10, 0),
            payload: EscrowDeployedPayload {
                escrow_address: ESCROW.to_string(),
                factory_address: "0xfaaa000000000000000000000000000000000f".to_string(),
                creator: "0xca11000000000000000000000000000000000c".to_string(),
            },
        })
        .await
        .unwrap();
    engine
        .apply(&DomainEvent::EscrowCreated {
            envelope: envelope(11, 0),
            payload: EscrowCreatedPayload {
                escrow_address: ESCROW.to_string(),
                payer: PAYER.to_string(),
                payee: "0xb0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0".to_string(),
                arbiter: "0x0000000000000000000000000000000000000000".to_string(),
                amount: "1000000000000000000".to_string(),
                asset: "0x0000000000000000000000000000000000000000".to_string(),
                release_delay_seconds: 0,
                approvals_required: 1,
            },
        })
        .await
        .unwrap();
    engine
        .apply(&DomainEvent::Approved {
            envelope: envelope(12, 0),
            payload: ApprovedPayload {
                escrow_address: ESCROW.to_string(),
                approver: "0xaaa1000000000000000000000000000000000a".to_string(),
            },
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn single_escrow_lookup_returns_envelope_with_meta() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: ESCROW_TEST_DATABASE_URL not set");
        return;
    };
    seed_one_escrow(&pool).await;

    let health = HealthState::new(pool.clone(), Duration::from_secs(300));
    let server = ApiServer::new("0.0.0.0:0".parse().unwrap(), pool.clone(), health);
    let routes = server.create_routes();

    let resp = warp::test::request().path(&format!("/escrows/{ESCROW}")).reply(&routes).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["data"]["escrow_address"], ESCROW);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["meta"]["count"], 1);
}

#[tokio::test]
async fn unknown_escrow_returns_404_error_envelope() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: ESCROW_TEST_DATABASE_URL not set");
        return;
    };

    let health = HealthState::new(pool.clone(), Duration::from_secs(300));
    let server = ApiServer::new("0.0.0.0:0".parse().unwrap(), pool.clone(), health);
    let routes = server.create_routes();

    let resp = warp::test::request()
        .path("/escrows/0xdead000000000000000000000000000000dead")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn invalid_address_returns_400_error_envelope() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: ESCROW_TEST_DATABASE_URL not set");
        return;
    };

    let health = HealthState::new(pool.clone(), Duration::from_secs(300));
    let server = ApiServer::new("0.0.0.0:0".parse().unwrap(), pool.clone(), health);
    let routes = server.create_routes();

    let resp = warp::test::request().path("/escrows/not-an-address").reply(&routes).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["error"]["code"], "invalid_address");
}

#[tokio::test]
async fn by_payer_lists_the_seeded_escrow() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: ESCROW_TEST_DATABASE_URL not set");
        return;
    };
    seed_one_escrow(&pool).await;

    let health = HealthState::new(pool.clone(), Duration::from_secs(300));
    let server = ApiServer::new("0.0.0.0:0".parse().unwrap(), pool.clone(), health);
    let routes = server.create_routes();

    let resp = warp::test::request().path(&format!("/escrows/by-payer/{PAYER}")).reply(&routes).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["data"][0]["escrow_address"], ESCROW);
}

#[tokio::test]
async fn health_endpoint_reflects_subscription_state() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: ESCROW_TEST_DATABASE_URL not set");
        return;
    };

    let health = HealthState::new(pool.clone(), Duration::from_secs(300));
    let server = ApiServer::new("0.0.0.0:0".parse().unwrap(), pool.clone(), health.clone());
    let routes = server.create_routes();

    let resp = warp::test::request().path("/health").reply(&routes).await;
    assert_eq!(resp.status(), 503, "subscription not yet marked attached");

    health.mark_subscription_attached(true);
    health.mark_event_applied();
    let resp = warp::test::request().path("/health").reply(&routes).await;
    assert_eq!(resp.status(), 200);
}
