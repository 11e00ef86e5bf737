//! Hand-rolled EVM JSON-RPC client shared by the Tailer and the Backfill
//! Runner. A thin `reqwest`-backed request/response wrapper, no
//! ABI-codegen crate — the Codec already owns decoding, this module just
//! fetches bytes and block numbers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::RawLog;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error talking to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("JSON-RPC error from {url}: {message} (code {code})")]
    Remote { url: String, code: i32, message: String },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl RpcError {
    /// All RPC failures are transient from the caller's point of view —
    /// both the Tailer and the Backfill Runner back off and retry rather
    /// than treating any of them as fatal.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: Vec<serde_json::Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
    #[allow(dead_code)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct EthLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "blockHash")]
    block_hash: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
}

pub struct EvmClient {
    client: reqwest::Client,
    rpc_url: String,
}

impl EvmClient {
    pub fn new(rpc_url: &str) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| RpcError::Transport {
                url: rpc_url.to_string(),
                source,
            })?;
        Ok(EvmClient {
            client,
            rpc_url: rpc_url.to_string(),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|source| RpcError::Transport {
                url: self.rpc_url.clone(),
                source,
            })?
            .json()
            .await
            .map_err(|source| RpcError::Transport {
                url: self.rpc_url.clone(),
                source,
            })?;

        if let Some(error) = response.error {
            return Err(RpcError::Remote {
                url: self.rpc_url.clone(),
                code: error.code,
                message: error.message,
            });
        }

        response.result.ok_or_else(|| RpcError::Malformed {
            url: self.rpc_url.clone(),
            reason: format!("empty result for {method}"),
        })
    }

    pub async fn get_block_number(&self) -> Result<u64, RpcError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex, &self.rpc_url)
    }

    /// Fetches logs for `[from_block, to_block]` (inclusive), filtered to
    /// `addresses`. Topic filtering is left to the caller (the Codec
    /// resolves event type from `topics[0]`) so one call covers every
    /// configured signature on a contract.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[String],
    ) -> Result<Vec<RawLog>, RpcError> {
        let filter = serde_json::json!({
            "address": addresses,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });

        let logs: Vec<EthLog> = self.call("eth_getLogs", vec![filter]).await?;
        let block_timestamps = self.block_timestamps(&logs).await?;

        logs.into_iter()
            .map(|log| {
                let block_number = parse_hex_u64(&log.block_number, &self.rpc_url)?;
                let log_index = parse_hex_u64(&log.log_index, &self.rpc_url)?;
                let block_timestamp = *block_timestamps.get(&block_number).unwrap_or(&0);
                Ok(RawLog {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                    block_number,
                    block_hash: log.block_hash,
                    tx_hash: log.transaction_hash,
                    log_index,
                    block_timestamp,
                })
            })
            .collect()
    }

    /// `eth_getLogs` doesn't return block timestamps; fetch the distinct
    /// set of blocks touched by this batch via `eth_getBlockByNumber`.
    async fn block_timestamps(
        &self,
        logs: &[EthLog],
    ) -> Result<std::collections::HashMap<u64, i64>, RpcError> {
        #[derive(Deserialize)]
        struct BlockHeader {
            timestamp: String,
        }

        let mut blocks: Vec<u64> = logs
            .iter()
            .map(|l| parse_hex_u64(&l.block_number, &self.rpc_url))
            .collect::<Result<Vec<_>, _>>()?;
        blocks.sort_unstable();
        blocks.dedup();

        let mut timestamps = std::collections::HashMap::new();
        for block in blocks {
            let header: BlockHeader = self
                .call(
                    "eth_getBlockByNumber",
                    vec![serde_json::json!(format!("0x{:x}", block)), serde_json::json!(false)],
                )
                .await?;
            timestamps.insert(block, parse_hex_u64(&header.timestamp, &self.rpc_url)? as i64);
        }
        Ok(timestamps)
    }
}

pub fn parse_hex_u64(hex: &str, url: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|_| RpcError::Malformed {
        url: url.to_string(),
        reason: format!("not a hex u64: {hex}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_block_numbers() {
        assert_eq!(parse_hex_u64("0x10", "http://x").unwrap(), 16);
        assert_eq!(parse_hex_u64("0x0", "http://x").unwrap(), 0);
    }

    #[test]
    fn rejects_non_hex() {
        assert!(parse_hex_u64("latest", "http://x").is_err());
    }
}
