//! Domain events and the Event Codec.
//!
//! Converts between raw EVM logs and the typed [`DomainEvent`] sum type,
//! and between that type and the canonical JSON wire format published on
//! the bus. Dispatch on event type happens exactly once, at this
//! boundary — everything downstream matches on the enum, exhaustively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::CodecError;

/// A raw EVM log as returned by `eth_getLogs`, already deserialized from
/// JSON-RPC but not yet decoded into a domain event.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_timestamp: i64,
}

/// The common envelope shared by every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_timestamp: i64,
    pub contract_address: String,
}

impl Envelope {
    /// `event_id` is a stable hash of `(chain_id, block_hash, log_index)`,
    /// the uniqueness key used for deduplication.
    pub fn compute_event_id(chain_id: u64, block_hash: &str, log_index: u64) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(chain_id.to_be_bytes());
        hasher.update(block_hash.to_lowercase().as_bytes());
        hasher.update(log_index.to_be_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    fn from_raw(raw: &RawLog, chain_id: u64) -> Self {
        let event_id = Self::compute_event_id(chain_id, &raw.block_hash, raw.log_index);
        Envelope {
            event_id,
            chain_id,
            block_number: raw.block_number,
            block_hash: normalize_hex(&raw.block_hash),
            tx_hash: normalize_hex(&raw.tx_hash),
            log_index: raw.log_index,
            block_timestamp: raw.block_timestamp,
            contract_address: normalize_address(&raw.address),
        }
    }
}

fn normalize_hex(s: &str) -> String {
    let s = s.strip_prefix("0x").unwrap_or(s);
    format!("0x{}", s.to_lowercase())
}

fn normalize_address(s: &str) -> String {
    normalize_hex(s)
}

/// Payload fields specific to `EscrowDeployed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDeployedPayload {
    pub escrow_address: String,
    pub factory_address: String,
    pub creator: String,
}

/// Payload fields specific to `EscrowCreated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowCreatedPayload {
    pub escrow_address: String,
    pub payer: String,
    pub payee: String,
    /// May be the zero address if the escrow has no arbiter.
    pub arbiter: String,
    /// uint256, preserved exactly as a decimal string.
    pub amount: String,
    /// Zero address for the native asset.
    pub asset: String,
    pub release_delay_seconds: u64,
    pub approvals_required: u32,
}

/// Payload fields specific to `Approved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedPayload {
    pub escrow_address: String,
    pub approver: String,
}

/// Payload fields specific to `EscrowReleased` and `EscrowRefunded`
/// (identical shape, distinguished by the envelope's `event_type`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPayload {
    pub escrow_address: String,
    pub to: String,
    pub amount: String,
}

/// The tagged sum type every downstream component branches on. Built once
/// at the Codec boundary: dynamic dispatch on event type happens exactly
/// here, never downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    EscrowDeployed {
        envelope: Envelope,
        payload: EscrowDeployedPayload,
    },
    EscrowCreated {
        envelope: Envelope,
        payload: EscrowCreatedPayload,
    },
    Approved {
        envelope: Envelope,
        payload: ApprovedPayload,
    },
    EscrowReleased {
        envelope: Envelope,
        payload: SettlementPayload,
    },
    EscrowRefunded {
        envelope: Envelope,
        payload: SettlementPayload,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::EscrowDeployed { .. } => "EscrowDeployed",
            DomainEvent::EscrowCreated { .. } => "EscrowCreated",
            DomainEvent::Approved { .. } => "Approved",
            DomainEvent::EscrowReleased { .. } => "EscrowReleased",
            DomainEvent::EscrowRefunded { .. } => "EscrowRefunded",
        }
    }

    pub fn envelope(&self) -> &Envelope {
        match self {
            DomainEvent::EscrowDeployed { envelope, .. }
            | DomainEvent::EscrowCreated { envelope, .. }
            | DomainEvent::Approved { envelope, .. }
            | DomainEvent::EscrowReleased { envelope, .. }
            | DomainEvent::EscrowRefunded { envelope, .. } => envelope,
        }
    }

    pub fn escrow_address(&self) -> &str {
        match self {
            DomainEvent::EscrowDeployed { payload, .. } => &payload.escrow_address,
            DomainEvent::EscrowCreated { payload, .. } => &payload.escrow_address,
            DomainEvent::Approved { payload, .. } => &payload.escrow_address,
            DomainEvent::EscrowReleased { payload, .. } => &payload.escrow_address,
            DomainEvent::EscrowRefunded { payload, .. } => &payload.escrow_address,
        }
    }

    /// Ordering key used everywhere §3.3/§8 require `(block_number,
    /// log_index)` ordering.
    pub fn order_key(&self) -> (u64, u64) {
        let env = self.envelope();
        (env.block_number, env.log_index)
    }

    /// Serialize the payload to a `serde_json::Value` with a stable
    /// (sorted) key order, matching the canonical wire format.
    fn payload_value(&self) -> serde_json::Value {
        let value = match self {
            DomainEvent::EscrowDeployed { payload, .. } => serde_json::to_value(payload),
            DomainEvent::EscrowCreated { payload, .. } => serde_json::to_value(payload),
            DomainEvent::Approved { payload, .. } => serde_json::to_value(payload),
            DomainEvent::EscrowReleased { payload, .. } => serde_json::to_value(payload),
            DomainEvent::EscrowRefunded { payload, .. } => serde_json::to_value(payload),
        };
        value.expect("domain payloads always serialize")
    }

    /// Encode to the canonical bus wire format: sorted keys, `event_type`
    /// present both at top level and inside the payload (defends against
    /// consumers that read one or the other).
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let env = self.envelope();
        let mut payload = self.payload_value();
        if let serde_json::Value::Object(ref mut map) = payload {
            map.insert(
                "event_type".to_string(),
                serde_json::Value::String(self.event_type().to_string()),
            );
        }

        // BTreeMap orders keys lexicographically, giving us canonical
        // (sorted-key) JSON without a custom serializer.
        let mut top: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();
        top.insert("event_id", serde_json::Value::String(env.event_id.clone()));
        top.insert(
            "event_type",
            serde_json::Value::String(self.event_type().to_string()),
        );
        top.insert("chain_id", serde_json::Value::from(env.chain_id));
        top.insert("block_number", serde_json::Value::from(env.block_number));
        top.insert(
            "block_hash",
            serde_json::Value::String(env.block_hash.clone()),
        );
        top.insert(
            "block_timestamp",
            serde_json::Value::from(env.block_timestamp),
        );
        top.insert("tx_hash", serde_json::Value::String(env.tx_hash.clone()));
        top.insert("log_index", serde_json::Value::from(env.log_index));
        top.insert(
            "contract_address",
            serde_json::Value::String(env.contract_address.clone()),
        );
        top.insert("payload", payload);

        serde_json::to_vec(&top).map_err(|e| CodecError::InvalidWireFormat(e.to_string()))
    }

    /// Decode from the canonical bus wire format. Tolerant of additive
    /// payload fields, so older consumers don't break when new fields
    /// appear.
    pub fn decode(bytes: &[u8]) -> Result<DomainEvent, CodecError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::InvalidWireFormat(e.to_string()))?;

        let get_str = |key: &str| -> Result<String, CodecError> {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| CodecError::InvalidWireFormat(format!("missing field {key}")))
        };
        let get_u64 = |key: &str| -> Result<u64, CodecError> {
            value
                .get(key)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| CodecError::InvalidWireFormat(format!("missing field {key}")))
        };
        let get_i64 = |key: &str| -> Result<i64, CodecError> {
            value
                .get(key)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| CodecError::InvalidWireFormat(format!("missing field {key}")))
        };

        let envelope = Envelope {
            event_id: get_str("event_id")?,
            chain_id: get_u64("chain_id")?,
            block_number: get_u64("block_number")?,
            block_hash: get_str("block_hash")?,
            tx_hash: get_str("tx_hash")?,
            log_index: get_u64("log_index")?,
            block_timestamp: get_i64("block_timestamp")?,
            contract_address: get_str("contract_address")?,
        };

        let payload = value
            .get("payload")
            .cloned()
            .ok_or_else(|| CodecError::InvalidWireFormat("missing payload".to_string()))?;

        // Prefer the broker-attribute event_type, but if it's empty fall
        // back to the one carried inside the payload; the bus layer owns
        // the attribute, here we just resolve.
        let top_event_type = value.get("event_type").and_then(|v| v.as_str());
        let payload_event_type = payload.get("event_type").and_then(|v| v.as_str());
        let event_type = match top_event_type {
            Some(t) if !t.is_empty() => t,
            _ => payload_event_type.ok_or_else(|| {
                CodecError::InvalidWireFormat("missing event_type on both attribute and payload".to_string())
            })?,
        };

        decode_typed(event_type, envelope, payload)
    }

    /// Decode a raw EVM log + resolved event type into a [`DomainEvent`].
    /// Returns `Ok(None)` for signatures the caller hasn't configured
    /// (non-fatal, logged upstream) and `Err` only for malformed payloads
    /// on a *recognized* signature (fatal for that log only, per §4.1).
    pub fn decode_log(
        raw: &RawLog,
        chain_id: u64,
        event_type: Option<&str>,
    ) -> Result<Option<DomainEvent>, CodecError> {
        let Some(event_type) = event_type else {
            return Ok(None);
        };
        let envelope = Envelope::from_raw(raw, chain_id);
        let event = decode_from_topics_and_data(event_type, envelope, &raw.topics, &raw.data)?;
        Ok(Some(event))
    }
}

fn decode_typed(
    event_type: &str,
    envelope: Envelope,
    payload: serde_json::Value,
) -> Result<DomainEvent, CodecError> {
    let malformed = |reason: String| CodecError::MalformedPayload {
        event_type: event_type.to_string(),
        log_ref: format!("{}:{}", envelope.block_hash, envelope.log_index),
        reason,
    };

    Ok(match event_type {
        "EscrowDeployed" => DomainEvent::EscrowDeployed {
            envelope,
            payload: serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?,
        },
        "EscrowCreated" => DomainEvent::EscrowCreated {
            envelope,
            payload: serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?,
        },
        "Approved" => DomainEvent::Approved {
            envelope,
            payload: serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?,
        },
        "EscrowReleased" => DomainEvent::EscrowReleased {
            envelope,
            payload: serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?,
        },
        "EscrowRefunded" => DomainEvent::EscrowRefunded {
            envelope,
            payload: serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?,
        },
        other => return Err(CodecError::UnknownEvent(other.to_string())),
    })
}

/// Extracts typed payload fields from ABI-encoded `topics`/`data`. Indexed
/// parameters land in `topics[1..]` (address-typed topics are left-padded
/// to 32 bytes); non-indexed parameters are packed into `data` in
/// 32-byte words, matching standard Solidity event ABI encoding.
fn decode_from_topics_and_data(
    event_type: &str,
    envelope: Envelope,
    topics: &[String],
    data: &str,
) -> Result<DomainEvent, CodecError> {
    let malformed = |reason: String| CodecError::MalformedPayload {
        event_type: event_type.to_string(),
        log_ref: format!("{}:{}", envelope.block_hash, envelope.log_index),
        reason,
    };

    let words = data_words(data);

    match event_type {
        "EscrowDeployed" => {
            // topics: [sig, escrow_address, factory_address, creator]
            let escrow_address = topic_address(topics, 1).ok_or_else(|| malformed("missing escrow_address topic".into()))?;
            let factory_address = topic_address(topics, 2).ok_or_else(|| malformed("missing factory_address topic".into()))?;
            let creator = topic_address(topics, 3).ok_or_else(|| malformed("missing creator topic".into()))?;
            Ok(DomainEvent::EscrowDeployed {
                envelope,
                payload: EscrowDeployedPayload {
                    escrow_address,
                    factory_address,
                    creator,
                },
            })
        }
        "EscrowCreated" => {
            // topics: [sig, escrow_address]; data: payer, payee, arbiter,
            // amount, asset, release_delay_seconds, approvals_required
            let escrow_address = topic_address(topics, 1).ok_or_else(|| malformed("missing escrow_address topic".into()))?;
            if words.len() < 7 {
                return Err(malformed(format!("expected 7 data words, got {}", words.len())));
            }
            let payer = word_address(&words[0]);
            let payee = word_address(&words[1]);
            let arbiter = word_address(&words[2]);
            let amount = word_uint256_decimal(&words[3]);
            let asset = word_address(&words[4]);
            let release_delay_seconds = word_u64(&words[5]).ok_or_else(|| malformed("release_delay_seconds overflow".into()))?;
            let approvals_required = word_u64(&words[6]).ok_or_else(|| malformed("approvals_required overflow".into()))? as u32;
            Ok(DomainEvent::EscrowCreated {
                envelope,
                payload: EscrowCreatedPayload {
                    escrow_address,
                    payer,
                    payee,
                    arbiter,
                    amount,
                    asset,
                    release_delay_seconds,
                    approvals_required,
                },
            })
        }
        "Approved" => {
            // topics: [sig, escrow_address, approver]
            let escrow_address = topic_address(topics, 1).ok_or_else(|| malformed("missing escrow_address topic".into()))?;
            let approver = topic_address(topics, 2).ok_or_else(|| malformed("missing approver topic".into()))?;
            Ok(DomainEvent::Approved {
                envelope,
                payload: ApprovedPayload {
                    escrow_address,
                    approver,
                },
            })
        }
        "EscrowReleased" | "EscrowRefunded" => {
            // topics: [sig, escrow_address]; data: to, amount
            let escrow_address = topic_address(topics, 1).ok_or_else(|| malformed("missing escrow_address topic".into()))?;
            if words.len() < 2 {
                return Err(malformed(format!("expected 2 data words, got {}", words.len())));
            }
            let to = word_address(&words[0]);
            let amount = word_uint256_decimal(&words[1]);
            let payload = SettlementPayload {
                escrow_address,
                to,
                amount,
            };
            Ok(if event_type == "EscrowReleased" {
                DomainEvent::EscrowReleased { envelope, payload }
            } else {
                DomainEvent::EscrowRefunded { envelope, payload }
            })
        }
        other => Err(CodecError::UnknownEvent(other.to_string())),
    }
}

fn topic_address(topics: &[String], index: usize) -> Option<String> {
    let topic = topics.get(index)?;
    Some(word_address(topic.strip_prefix("0x").unwrap_or(topic)))
}

fn data_words(data: &str) -> Vec<String> {
    let data = data.strip_prefix("0x").unwrap_or(data);
    data.as_bytes()
        .chunks(64)
        .filter(|c| c.len() == 64)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect()
}

fn word_address(word: &str) -> String {
    let word = word.trim_start_matches("0x");
    let tail = if word.len() >= 40 {
        &word[word.len() - 40..]
    } else {
        word
    };
    format!("0x{}", tail.to_lowercase())
}

fn word_u64(word: &str) -> Option<u64> {
    let trimmed = word.trim_start_matches('0');
    if trimmed.is_empty() {
        return Some(0);
    }
    if trimmed.len() > 16 {
        return None; // would overflow u64 — caller treats as malformed
    }
    u64::from_str_radix(trimmed, 16).ok()
}

/// Converts a 32-byte big-endian hex word into its exact decimal-string
/// representation, without ever routing the value through a float.
fn word_uint256_decimal(word: &str) -> String {
    let bytes = hex_to_bytes(word);
    bytes_to_decimal(&bytes)
}

fn hex_to_bytes(word: &str) -> Vec<u8> {
    (0..word.len())
        .step_by(2)
        .filter_map(|i| word.get(i..i + 2))
        .filter_map(|b| u8::from_str_radix(b, 16).ok())
        .collect()
}

/// Base-256 to base-10 conversion via repeated division, so amounts never
/// lose precision for full uint256 values.
fn bytes_to_decimal(bytes: &[u8]) -> String {
    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for d in digits.iter_mut() {
            let v = (*d as u32) * 256 + carry;
            *d = (v % 10) as u8;
            carry = v / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    while digits.len() > 1 && *digits.last().unwrap() == 0 {
        digits.pop();
    }
    digits
        .iter()
        .rev()
        .map(|d| (b'0' + d) as char)
        .collect()
}
