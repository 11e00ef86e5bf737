//! Route handlers for the Query API. Every handler returns the canonical
//! envelope `{data, meta: {queried_at, count}}` on success; errors are
//! surfaced as warp rejections and flattened to `{error: {code, message}}`
//! by [`handle_rejection`].

use std::convert::Infallible;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use escrow_core::db::{ApprovalRow, EscrowEventRow, EscrowRow};

use crate::health::HealthState;

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    data: T,
    meta: Meta,
}

#[derive(Debug, Serialize)]
struct Meta {
    queried_at: chrono::DateTime<Utc>,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
}

fn envelope<T: Serialize>(data: T, count: usize) -> impl Reply {
    warp::reply::json(&Envelope {
        data,
        meta: Meta {
            queried_at: Utc::now(),
            count,
            next_cursor: None,
        },
    })
}

/// Same as [`envelope`] but for cursor-paginated list endpoints, where the
/// caller passes the cursor for the next page (the `(last_event_block,
/// escrow_address)` pair of the last row returned, or `None` if this page
/// wasn't full).
fn paginated_envelope<T: Serialize>(data: T, count: usize, next_cursor: Option<String>) -> impl Reply {
    warp::reply::json(&Envelope {
        data,
        meta: Meta {
            queried_at: Utc::now(),
            count,
            next_cursor,
        },
    })
}

#[derive(Debug)]
struct InvalidAddress(String);
impl warp::reject::Reject for InvalidAddress {}

#[derive(Debug)]
struct InvalidCursor(String);
impl warp::reject::Reject for InvalidCursor {}

#[derive(Debug)]
struct NotFound;
impl warp::reject::Reject for NotFound {}

#[derive(Debug)]
struct Database(String);
impl warp::reject::Reject for Database {}

/// Addresses are lowercase `0x`-prefixed 20-byte hex.
fn validate_address(addr: &str) -> Result<String, Rejection> {
    let ok = addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if ok {
        Ok(addr.to_string())
    } else {
        Err(warp::reject::custom(InvalidAddress(addr.to_string())))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
    cursor: Option<String>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    /// Cursor format is `{last_event_block}:{escrow_address}`, the same
    /// pair the listing is ordered on, so the next page's predicate is a
    /// single row-value comparison.
    fn cursor(&self) -> Result<Option<(i64, String)>, Rejection> {
        let Some(raw) = &self.cursor else {
            return Ok(None);
        };
        let (block, addr) = raw.split_once(':').ok_or_else(|| warp::reject::custom(InvalidCursor(raw.clone())))?;
        let block: i64 = block.parse().map_err(|_| warp::reject::custom(InvalidCursor(raw.clone())))?;
        Ok(Some((block, addr.to_string())))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AddressRole {
    Payer,
    Payee,
    Arbiter,
}

impl AddressRole {
    fn column(&self) -> &'static str {
        match self {
            AddressRole::Payer => "payer",
            AddressRole::Payee => "payee",
            AddressRole::Arbiter => "arbiter",
        }
    }
}

async fn list_by_field(
    pool: &PgPool,
    column: &str,
    addr: &str,
    status: Option<&str>,
    limit: i64,
    cursor: Option<&(i64, String)>,
) -> Result<Vec<EscrowRow>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM escrows WHERE {column} = $1
         AND ($2::escrow_status IS NULL OR status = $2)
         AND ($4::bigint IS NULL OR (last_event_block, escrow_address) < ($4, $5))
         ORDER BY last_event_block DESC, escrow_address DESC
         LIMIT $3"
    );
    sqlx::query_as::<_, EscrowRow>(&sql)
        .bind(addr)
        .bind(status)
        .bind(limit)
        .bind(cursor.map(|c| c.0))
        .bind(cursor.map(|c| c.1.clone()))
        .fetch_all(pool)
        .await
}

pub async fn by_field_handler(
    addr: String,
    query: ListQuery,
    pool: PgPool,
    role: AddressRole,
) -> Result<impl Reply, Rejection> {
    let addr = validate_address(&addr)?;
    let cursor = query.cursor()?;
    let limit = query.limit();
    let rows = list_by_field(&pool, role.column(), &addr, query.status.as_deref(), limit, cursor.as_ref())
        .await
        .map_err(|e| warp::reject::custom(Database(e.to_string())))?;
    let count = rows.len();
    let next_cursor = if count as i64 == limit {
        rows.last().map(|r| format!("{}:{}", r.last_event_block, r.escrow_address))
    } else {
        None
    };
    Ok(paginated_envelope(rows, count, next_cursor))
}

#[derive(Debug, Serialize)]
struct ByRole {
    as_payer: Vec<EscrowRow>,
    as_payee: Vec<EscrowRow>,
    as_arbiter: Vec<EscrowRow>,
}

pub async fn by_role_handler(addr: String, pool: PgPool) -> Result<impl Reply, Rejection> {
    let addr = validate_address(&addr)?;
    let limit = ListQuery { status: None, limit: None, cursor: None }.limit();

    let as_payer = list_by_field(&pool, "payer", &addr, None, limit, None)
        .await
        .map_err(|e| warp::reject::custom(Database(e.to_string())))?;
    let as_payee = list_by_field(&pool, "payee", &addr, None, limit, None)
        .await
        .map_err(|e| warp::reject::custom(Database(e.to_string())))?;
    let as_arbiter = list_by_field(&pool, "arbiter", &addr, None, limit, None)
        .await
        .map_err(|e| warp::reject::custom(Database(e.to_string())))?;

    let count = as_payer.len() + as_payee.len() + as_arbiter.len();
    Ok(envelope(
        ByRole {
            as_payer,
            as_payee,
            as_arbiter,
        },
        count,
    ))
}

pub async fn single_handler(addr: String, pool: PgPool) -> Result<impl Reply, Rejection> {
    let addr = validate_address(&addr)?;
    let row: Option<EscrowRow> = sqlx::query_as("SELECT * FROM escrows WHERE escrow_address = $1")
        .bind(&addr)
        .fetch_optional(&pool)
        .await
        .map_err(|e| warp::reject::custom(Database(e.to_string())))?;

    match row {
        Some(row) => Ok(envelope(row, 1)),
        None => Err(warp::reject::custom(NotFound)),
    }
}

pub async fn approvals_handler(addr: String, pool: PgPool) -> Result<impl Reply, Rejection> {
    let addr = validate_address(&addr)?;
    let rows: Vec<ApprovalRow> = sqlx::query_as(
        "SELECT * FROM approvals WHERE escrow_address = $1 ORDER BY block_number ASC",
    )
    .bind(&addr)
    .fetch_all(&pool)
    .await
    .map_err(|e| warp::reject::custom(Database(e.to_string())))?;

    let count = rows.len();
    Ok(envelope(rows, count))
}

pub async fn events_handler(addr: String, pool: PgPool) -> Result<impl Reply, Rejection> {
    let addr = validate_address(&addr)?;
    let rows: Vec<EscrowEventRow> = sqlx::query_as(
        "SELECT * FROM escrow_events WHERE escrow_address = $1 ORDER BY block_number ASC, log_index ASC",
    )
    .bind(&addr)
    .fetch_all(&pool)
    .await
    .map_err(|e| warp::reject::custom(Database(e.to_string())))?;

    let count = rows.len();
    Ok(envelope(rows, count))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct StatusCount {
    status: String,
    count: i64,
}

#[derive(Debug, Serialize)]
struct Stats {
    total: i64,
    by_status: Vec<StatusCount>,
}

pub async fn stats_handler(pool: PgPool) -> Result<impl Reply, Rejection> {
    let by_status: Vec<StatusCount> = sqlx::query_as(
        "SELECT status::text AS status, COUNT(*) AS count FROM escrows GROUP BY status",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| warp::reject::custom(Database(e.to_string())))?;

    let total = by_status.iter().map(|s| s.count).sum();
    Ok(envelope(Stats { total, by_status }, 1))
}

pub async fn health_handler(health: std::sync::Arc<HealthState>) -> Result<impl Reply, Rejection> {
    let report = health.check().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(warp::reply::json(&report), status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_address_accepts_lowercase_hex() {
        assert!(validate_address("0xaaaa000000000000000000000000000000000a").is_ok());
    }

    #[test]
    fn validate_address_rejects_uppercase_and_short() {
        assert!(validate_address("0xAAAA000000000000000000000000000000000A").is_err());
        assert!(validate_address("0xabc").is_err());
        assert!(validate_address("not-an-address").is_err());
    }

    #[test]
    fn list_query_limit_clamps_to_bounds() {
        assert_eq!(ListQuery { status: None, limit: None, cursor: None }.limit(), 50);
        assert_eq!(ListQuery { status: None, limit: Some(10_000), cursor: None }.limit(), 500);
        assert_eq!(ListQuery { status: None, limit: Some(0), cursor: None }.limit(), 1);
    }

    #[test]
    fn list_query_cursor_parses_block_and_address() {
        let q = ListQuery { status: None, limit: None, cursor: Some("42:0xabc".to_string()) };
        assert_eq!(q.cursor().unwrap(), Some((42, "0xabc".to_string())));
    }

    #[test]
    fn list_query_cursor_rejects_malformed_values() {
        let q = ListQuery { status: None, limit: None, cursor: Some("not-a-cursor".to_string()) };
        assert!(q.cursor().is_err());

        let q = ListQuery { status: None, limit: None, cursor: Some("abc:0xdef".to_string()) };
        assert!(q.cursor().is_err());
    }
}

/// Turns rejections (ours and warp's built-ins) into the canonical
/// `{error: {code, message}}` shape.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "no matching route".to_string())
    } else if let Some(InvalidAddress(addr)) = err.find() {
        (StatusCode::BAD_REQUEST, "invalid_address", format!("'{addr}' is not a valid lowercase hex address"))
    } else if let Some(InvalidCursor(cursor)) = err.find() {
        (StatusCode::BAD_REQUEST, "invalid_cursor", format!("'{cursor}' is not a valid '{{block}}:{{address}}' cursor"))
    } else if err.find::<NotFound>().is_some() {
        (StatusCode::NOT_FOUND, "not_found", "escrow not found".to_string())
    } else if let Some(Database(reason)) = err.find() {
        (StatusCode::SERVICE_UNAVAILABLE, "database_unavailable", reason.clone())
    } else {
        (StatusCode::BAD_REQUEST, "bad_request", format!("{err:?}"))
    };

    let body = serde_json::json!({ "error": { "code": code, "message": message } });
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
