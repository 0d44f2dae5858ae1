//! Identifier Codec
//!
//! Deterministic, reversible mapping between the 128-bit order id (UUID)
//! and the ledger's native scalar field encoding ("felt"). The felt side is
//! a big integer rendered as `0x`-prefixed lowercase hex with leading zeros
//! stripped, so the decoder must re-pad to 32 nibbles before rebuilding the
//! UUID. Round-trips exactly for all 128-bit values.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeltError {
    #[error("Empty felt value")]
    Empty,

    #[error("Invalid hex in felt: {0}")]
    InvalidHex(String),

    #[error("Felt wider than 128 bits: {nibbles} nibbles")]
    TooWide { nibbles: usize },
}

/// Encode an order id as a ledger felt (hex big integer, no leading zeros)
pub fn encode_order_id(id: &Uuid) -> String {
    format!("0x{:x}", id.as_u128())
}

/// Decode a ledger felt back to the 128-bit order id
///
/// Accepts with or without the `0x` prefix; re-pads the stripped leading
/// zeros to reconstruct the full 32-nibble identifier.
pub fn decode_order_id(felt: &str) -> Result<Uuid, FeltError> {
    let hex = felt
        .strip_prefix("0x")
        .or_else(|| felt.strip_prefix("0X"))
        .unwrap_or(felt);

    if hex.is_empty() {
        return Err(FeltError::Empty);
    }
    if hex.len() > 32 {
        return Err(FeltError::TooWide { nibbles: hex.len() });
    }

    let value = u128::from_str_radix(hex, 16)
        .map_err(|_| FeltError::InvalidHex(felt.to_string()))?;

    Ok(Uuid::from_u128(value))
}
