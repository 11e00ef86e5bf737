//! Backfill Runner: replays a historical block range through the
//! Projection Engine directly, bypassing the bus entirely. Safe to rerun
//! and safe to run alongside the live pipeline — all convergence comes
//! from event_id deduplication in the Projection Engine, the Checkpoint
//! is never touched.

use std::sync::Arc;

use escrow_core::db::ApplyOutcome;
use escrow_core::events::DomainEvent;
use escrow_core::rpc::EvmClient;
use escrow_core::ProjectionEngine;
use tracing::{info, warn};

const MIN_BATCH_BLOCKS: u64 = 100;

pub struct BackfillRunner {
    client: EvmClient,
    engine: Option<Arc<ProjectionEngine>>,
    chain_id: u64,
    contract_addresses: Vec<String>,
    event_signatures: std::collections::HashMap<String, String>,
    batch_size: u64,
    dry_run: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BackfillReport {
    pub blocks_scanned: u64,
    pub logs_seen: u64,
    pub events_decoded: u64,
    pub events_skipped_unconfigured: u64,
    pub events_malformed: u64,
    pub outcomes_applied: u64,
    pub outcomes_duplicate: u64,
    pub outcomes_buffered: u64,
    pub outcomes_rejected: u64,
}

impl BackfillRunner {
    pub fn new(
        client: EvmClient,
        engine: Option<Arc<ProjectionEngine>>,
        chain_id: u64,
        contract_addresses: Vec<String>,
        event_signatures: std::collections::HashMap<String, String>,
        batch_size: u64,
        dry_run: bool,
    ) -> Self {
        BackfillRunner {
            client,
            engine,
            chain_id,
            contract_addresses,
            event_signatures,
            batch_size: batch_size.max(MIN_BATCH_BLOCKS),
            dry_run,
        }
    }

    /// Walks `[from_block, to_block]` inclusive in batches, halving the
    /// batch size (down to a 100-block floor) whenever a batch's RPC
    /// calls fail, and retrying the same range at the smaller size.
    pub async fn run(&self, from_block: u64, to_block: u64) -> Result<BackfillReport, String> {
        let mut report = BackfillReport::default();
        let mut cursor = from_block;
        let mut batch_size = self.batch_size;

        while cursor <= to_block {
            let batch_to = std::cmp::min(cursor + batch_size - 1, to_block);

            match self.client.get_logs(cursor, batch_to, &self.contract_addresses).await {
                Ok(logs) => {
                    report.blocks_scanned += batch_to - cursor + 1;
                    report.logs_seen += logs.len() as u64;

                    let mut ordered = logs;
                    ordered.sort_by_key(|l| (l.block_number, l.log_index));

                    for raw in &ordered {
                        let topic0 = raw.topics.first().map(String::as_str);
                        let event_type = topic0.and_then(|t| self.event_signatures.get(&t.to_lowercase()).map(String::as_str));

                        match DomainEvent::decode_log(raw, self.chain_id, event_type) {
                            Ok(Some(event)) => {
                                report.events_decoded += 1;
                                self.apply_one(event, &mut report).await;
                            }
                            Ok(None) => {
                                report.events_skipped_unconfigured += 1;
                            }
                            Err(e) => {
                                report.events_malformed += 1;
                                warn!(
                                    chain_id = self.chain_id,
                                    block = raw.block_number,
                                    log_index = raw.log_index,
                                    error = %e,
                                    "malformed event payload during backfill, skipping log"
                                );
                            }
                        }
                    }

                    info!(
                        chain_id = self.chain_id,
                        from = cursor,
                        to = batch_to,
                        batch_size,
                        logs = ordered.len(),
                        "backfill batch complete"
                    );
                    cursor = batch_to + 1;
                    batch_size = self.batch_size;
                }
                Err(e) => {
                    if batch_size <= MIN_BATCH_BLOCKS {
                        return Err(format!(
                            "rpc error at batch size floor ({MIN_BATCH_BLOCKS} blocks), range [{cursor}, {batch_to}]: {e}"
                        ));
                    }
                    batch_size = std::cmp::max(batch_size / 2, MIN_BATCH_BLOCKS);
                    warn!(
                        chain_id = self.chain_id,
                        error = %e,
                        new_batch_size = batch_size,
                        "rpc error during backfill, halving batch size and retrying"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn apply_one(&self, event: DomainEvent, report: &mut BackfillReport) {
        if self.dry_run {
            return;
        }
        let Some(engine) = &self.engine else {
            return;
        };
        match engine.apply(&event).await {
            Ok(ApplyOutcome::Applied) => report.outcomes_applied += 1,
            Ok(ApplyOutcome::SkippedDuplicate) => report.outcomes_duplicate += 1,
            Ok(ApplyOutcome::OutOfOrderBuffered) => report.outcomes_buffered += 1,
            Ok(ApplyOutcome::Rejected) => report.outcomes_rejected += 1,
            Err(e) => {
                warn!(
                    chain_id = self.chain_id,
                    event_id = %event.envelope().event_id,
                    error = %e,
                    "projection error during backfill"
                );
            }
        }
    }
}
