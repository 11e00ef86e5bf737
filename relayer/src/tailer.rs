//! Chain Tailer: walks the head of one chain and publishes ordered
//! `(block, log_index)` batches. Confirmation-depth windowing means a
//! reorg inside the window never reaches the Tailer's input; a reorg
//! that reaches past it is a fatal anomaly, not something this module
//! tries to repair — silent recovery from a deep reorg would risk
//! projecting events that never happened on the canonical chain.

use std::sync::Arc;
use std::time::Duration;

use escrow_core::db::CheckpointStore;
use escrow_core::error::FatalError;
use escrow_core::events::DomainEvent;
use escrow_core::rpc::EvmClient;
use escrow_core::{retry_rpc, ChainConfig, Publisher};
use tokio_util::sync::CancellationToken;

pub struct ChainTailer {
    chain: ChainConfig,
    client: EvmClient,
    checkpoints: Arc<CheckpointStore>,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl ChainTailer {
    pub fn new(
        chain: ChainConfig,
        checkpoints: Arc<CheckpointStore>,
        publisher: Arc<dyn Publisher>,
        topic: String,
    ) -> Result<Self, FatalError> {
        let client = EvmClient::new(&chain.rpc_url)
            .map_err(|e| FatalError::Config(format!("invalid RPC URL {}: {e}", chain.rpc_url)))?;
        Ok(ChainTailer {
            chain,
            client,
            checkpoints,
            publisher,
            topic,
        })
    }

    /// Runs until `cancel` fires or a fatal anomaly is hit. A deep reorg
    /// surfaces as `Err(FatalError::DeepReorg)` so the binary can exit
    /// with a dedicated exit code.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), FatalError> {
        let mut checkpoint = self
            .checkpoints
            .load(self.chain.chain_id)
            .await
            .map_err(|e| FatalError::CheckpointUnavailable(e.to_string()))?
            .unwrap_or(escrow_core::Checkpoint {
                last_safe_block: 0,
                last_safe_log_index: 0,
            });

        loop {
            if cancel.is_cancelled() {
                tracing::info!(chain_id = self.chain.chain_id, "tailer shutting down");
                return Ok(());
            }

            match self.tick(checkpoint).await {
                Ok(Some(new_checkpoint)) => {
                    checkpoint = new_checkpoint;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.chain.poll_interval()) => {}
                        _ = cancel.cancelled() => return Ok(()),
                    }
                }
                Err(TickError::Fatal(fatal)) => return Err(fatal),
                Err(TickError::Transient(reason)) => {
                    tracing::warn!(chain_id = self.chain.chain_id, %reason, "tailer tick failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = cancel.cancelled() => return Ok(()),
                    }
                }
            }
        }
    }

    /// One iteration of the head-walking loop. Returns the advanced
    /// checkpoint on progress, `None` if there was nothing safe to do yet.
    async fn tick(
        &self,
        checkpoint: escrow_core::Checkpoint,
    ) -> Result<Option<escrow_core::Checkpoint>, TickError> {
        let head = retry_rpc(5, || self.client.get_block_number())
            .await
            .map_err(|e| TickError::Transient(e.to_string()))?;

        if head < self.chain.confirmation_depth {
            return Ok(None); // chain younger than the confirmation window
        }
        let safe = head - self.chain.confirmation_depth;

        if safe <= checkpoint.last_safe_block {
            return Ok(None);
        }

        // A checkpoint ahead of the new safe head (possible only if an
        // operator moved it forward by hand, or a prior deep reorg wasn't
        // yet resolved) is the fatal anomaly this loop refuses to paper over.
        if checkpoint.last_safe_block > safe {
            return Err(TickError::Fatal(FatalError::DeepReorg {
                chain_id: self.chain.chain_id,
                checkpoint_block: checkpoint.last_safe_block,
            }));
        }

        let from = checkpoint.last_safe_block + 1;
        let to = std::cmp::min(safe, checkpoint.last_safe_block + self.chain.max_window_blocks);

        let logs = retry_rpc(5, || {
            self.client.get_logs(from, to, &self.chain.contract_addresses)
        })
        .await
        .map_err(|e| TickError::Transient(e.to_string()))?;

        let mut ordered = logs;
        ordered.sort_by_key(|l| (l.block_number, l.log_index));

        if self.chain.standby {
            // Standby tailers track the chain for readiness/monitoring
            // but never publish — an operator-driven failover mode.
            metrics::gauge!("tailer_lag_blocks", "chain_id" => self.chain.chain_id.to_string())
                .set((head - to) as f64);
            return Ok(Some(escrow_core::Checkpoint {
                last_safe_block: to,
                last_safe_log_index: 0,
            }));
        }

        for raw in &ordered {
            let topic0 = raw.topics.first().map(String::as_str);
            let event_type = topic0.and_then(|t| self.chain.resolve_event_type(t));

            match DomainEvent::decode_log(raw, self.chain.chain_id, event_type) {
                Ok(Some(event)) => {
                    self.publisher
                        .publish(&self.topic, &event)
                        .await
                        .map_err(|e| TickError::Transient(e.to_string()))?;
                }
                Ok(None) => {
                    tracing::debug!(
                        chain_id = self.chain.chain_id,
                        block = raw.block_number,
                        log_index = raw.log_index,
                        "skipping log with unconfigured signature"
                    );
                }
                Err(e) => {
                    // Malformed payload on a recognized signature: fatal
                    // for this log only, never blocks the tailer (§4.1).
                    tracing::error!(
                        chain_id = self.chain.chain_id,
                        block = raw.block_number,
                        log_index = raw.log_index,
                        error = %e,
                        "malformed event payload, skipping log"
                    );
                    metrics::counter!("codec_errors_total").increment(1);
                }
            }
        }

        self.checkpoints
            .save(self.chain.chain_id, to, u64::MAX, false)
            .await
            .map_err(|e| TickError::Fatal(FatalError::CheckpointUnavailable(e.to_string())))?;

        metrics::gauge!("tailer_lag_blocks", "chain_id" => self.chain.chain_id.to_string())
            .set((head - to) as f64);

        Ok(Some(escrow_core::Checkpoint {
            last_safe_block: to,
            last_safe_log_index: u64::MAX,
        }))
    }
}

enum TickError {
    Fatal(FatalError),
    Transient(String),
}
