//! Row types for the projection tables.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, sqlx::Type, Serialize)]
#[sqlx(type_name = "escrow_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    Deployed,
    Created,
    Approved,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Deployed => "deployed",
            EscrowStatus::Created => "created",
            EscrowStatus::Approved => "approved",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EscrowRow {
    pub escrow_address: String,
    pub chain_id: i64,
    pub payer: Option<String>,
    pub payee: Option<String>,
    pub arbiter: Option<String>,
    pub asset: Option<String>,
    pub amount: Option<BigDecimal>,
    pub status: EscrowStatus,
    pub approvals_count: i32,
    pub approvals_required: i32,
    pub deploy_tx: Option<String>,
    pub deploy_block: Option<i64>,
    pub last_event_block: i64,
    pub last_event_log_index: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApprovalRow {
    pub escrow_address: String,
    pub approver: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub block_timestamp: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EscrowEventRow {
    pub event_id: String,
    pub event_type: String,
    pub chain_id: i64,
    pub block_number: i64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_timestamp: i64,
    pub contract_address: String,
    pub escrow_address: String,
    pub payload_json: serde_json::Value,
    pub outcome: String,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    pub chain_id: i64,
    pub last_safe_block: i64,
    pub last_safe_log_index: i64,
    pub updated_at: DateTime<Utc>,
}
