//! Ledger Event Types
//!
//! Wire shapes for the external notification feed and the normalized,
//! name-tagged event the router dispatches on. The raw `data` payload is
//! closed into the [`EventPayload`] enum; names we do not recognize land in
//! `Unknown` and are logged and dropped instead of failing the batch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::order::types::SwapDirection;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event missing its name discriminator")]
    MissingName,

    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Unrecognized payload body: {0}")]
    Json(#[from] serde_json::Error),
}

/// One raw event object as delivered by the gateway webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub block_number: String,
    /// Unix seconds
    pub block_timestamp: String,
    pub transaction_hash: String,
    pub event_index: String,
    pub data: Value,
}

/// The three accepted notification body shapes
///
/// Untagged: a batch envelope is a map carrying `events`, a single event is
/// a map without it, and the bare form is an array. Order matters, the
/// envelope must be tried before the single object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NotificationBody {
    #[serde(rename_all = "camelCase")]
    Envelope {
        events: Vec<RawEvent>,
        #[serde(default)]
        block_number: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Array(Vec<RawEvent>),
    Single(RawEvent),
}

/// Normalized event handed to the router
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    pub name: String,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub transaction_hash: String,
    pub event_index: i64,
    pub payload: EventPayload,
}

/// Closed union of recognized event payloads
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    LiquidityAdded {
        symbol: String,
        amount: Decimal,
    },
    LiquidityRemoved {
        symbol: String,
        amount: Decimal,
    },
    DepositConfirmed {
        reference: String,
        symbol: String,
        amount: Decimal,
    },
    SwapExecuted {
        direction: SwapDirection,
        /// Felt-encoded order id; absent only in legacy event shapes
        order_id: Option<String>,
        from_symbol: String,
        to_symbol: String,
        /// Confirmed on-chain amount in smallest units of the token leg
        onchain_amount: u128,
    },
    WithdrawalCompleted {
        reference: String,
    },
    /// Recognized shape, unrecognized name; logged and dropped
    Unknown {
        name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiquidityBody {
    symbol: String,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepositBody {
    reference: String,
    symbol: String,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapBody {
    #[serde(default)]
    order_id: Option<String>,
    from_symbol: String,
    to_symbol: String,
    /// Smallest-unit integer, as a string (felt-sized values overflow JSON
    /// numbers)
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalBody {
    reference: String,
}

impl EventPayload {
    /// Build a payload from the raw `data` object, keyed by its `name` field
    pub fn from_data(data: &Value) -> Result<(String, Self), EventError> {
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or(EventError::MissingName)?
            .to_string();

        let payload = match name.as_str() {
            "LiquidityAdded" => {
                let body: LiquidityBody = serde_json::from_value(data.clone())?;
                EventPayload::LiquidityAdded {
                    symbol: body.symbol,
                    amount: body.amount,
                }
            }
            "LiquidityRemoved" => {
                let body: LiquidityBody = serde_json::from_value(data.clone())?;
                EventPayload::LiquidityRemoved {
                    symbol: body.symbol,
                    amount: body.amount,
                }
            }
            "DepositConfirmed" => {
                let body: DepositBody = serde_json::from_value(data.clone())?;
                EventPayload::DepositConfirmed {
                    reference: body.reference,
                    symbol: body.symbol,
                    amount: body.amount,
                }
            }
            "FiatToTokenSwapExecuted" | "TokenToFiatSwapExecuted" => {
                let direction = if name == "FiatToTokenSwapExecuted" {
                    SwapDirection::FiatToToken
                } else {
                    SwapDirection::TokenToFiat
                };
                let body: SwapBody = serde_json::from_value(data.clone())?;
                let onchain_amount = body.amount.parse::<u128>().map_err(|_| {
                    EventError::Malformed(format!("bad on-chain amount: {}", body.amount))
                })?;
                EventPayload::SwapExecuted {
                    direction,
                    order_id: body.order_id,
                    from_symbol: body.from_symbol,
                    to_symbol: body.to_symbol,
                    onchain_amount,
                }
            }
            "WithdrawalCompleted" => {
                let body: WithdrawalBody = serde_json::from_value(data.clone())?;
                EventPayload::WithdrawalCompleted {
                    reference: body.reference,
                }
            }
            _ => EventPayload::Unknown { name: name.clone() },
        };

        Ok((name, payload))
    }
}

impl LedgerEvent {
    /// Normalize one raw event, rejecting unparseable envelope fields
    pub fn from_raw(raw: &RawEvent) -> Result<Self, EventError> {
        let (name, payload) = EventPayload::from_data(&raw.data)?;

        let block_number = raw
            .block_number
            .parse::<i64>()
            .map_err(|_| EventError::Malformed(format!("bad blockNumber: {}", raw.block_number)))?;

        let timestamp_secs = raw.block_timestamp.parse::<i64>().map_err(|_| {
            EventError::Malformed(format!("bad blockTimestamp: {}", raw.block_timestamp))
        })?;
        let block_timestamp = DateTime::<Utc>::from_timestamp(timestamp_secs, 0)
            .ok_or_else(|| {
                EventError::Malformed(format!("blockTimestamp out of range: {}", timestamp_secs))
            })?;

        let event_index = raw
            .event_index
            .parse::<i64>()
            .map_err(|_| EventError::Malformed(format!("bad eventIndex: {}", raw.event_index)))?;

        Ok(Self {
            name,
            block_number,
            block_timestamp,
            transaction_hash: raw.transaction_hash.clone(),
            event_index,
            payload,
        })
    }
}
