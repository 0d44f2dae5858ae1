//! Swap Order Core Types
//!
//! Type definitions for the order lifecycle state machine and the
//! settlement records derived from it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Swap order lifecycle status
///
/// Transitions only move forward:
/// `pending -> processing -> {completed | failed}`,
/// `completed -> payout_failed` (payout failure never reverts completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum OrderStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
    PayoutFailed = 5,
}

impl OrderStatus {
    /// Numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderStatus::Pending),
            2 => Some(OrderStatus::Processing),
            3 => Some(OrderStatus::Completed),
            4 => Some(OrderStatus::Failed),
            5 => Some(OrderStatus::PayoutFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::PayoutFailed => "payout_failed",
        }
    }

    /// Terminal for the execution pipeline (no further ledger submission)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::PayoutFailed
        )
    }

    /// Eligible for event matching. `payout_failed` is re-entrant: a payout
    /// retry routes back through matching for retriggering.
    pub fn is_matchable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Processing | OrderStatus::PayoutFailed
        )
    }

    /// Statuses accepted by the conditional completion update
    pub fn matchable_ids() -> [i16; 3] {
        [
            OrderStatus::Pending.id(),
            OrderStatus::Processing.id(),
            OrderStatus::PayoutFailed.id(),
        ]
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Swap direction, fixed at intent time from the currency pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum SwapDirection {
    /// Fiat collected off-chain, tokens delivered on-chain
    FiatToToken = 1,
    /// Tokens collected on-chain, fiat paid out after confirmation
    TokenToFiat = 2,
}

impl SwapDirection {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(SwapDirection::FiatToToken),
            2 => Some(SwapDirection::TokenToFiat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapDirection::FiatToToken => "fiat_to_token",
            SwapDirection::TokenToFiat => "token_to_fiat",
        }
    }
}

impl fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's swap request, validated by the orchestrator before persistence
#[derive(Debug, Clone, Deserialize)]
pub struct SwapIntent {
    pub user_id: i64,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Decimal,
    /// Quoted rate at intent time, retained for audit only; settlement is
    /// always recomputed from the live rate snapshot
    pub rate: Decimal,
    /// Quoted fee at intent time, in the from-currency
    pub fee: Decimal,
    /// User's on-chain address (receiving for fiat->token, sending for
    /// token->fiat)
    pub user_address: String,
    /// Fiat account: charge source for fiat->token, payout destination for
    /// token->fiat
    pub fiat_account: Option<String>,
}

/// The unit of work: one recorded swap intent tracked to confirmation
#[derive(Debug, Clone, Serialize)]
pub struct SwapOrder {
    pub id: Uuid,
    pub user_id: i64,
    pub direction: SwapDirection,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Decimal,
    /// None until confirmed on-chain
    pub to_amount: Option<Decimal>,
    pub rate: Decimal,
    pub fee: Decimal,
    pub status: OrderStatus,
    /// External-system idempotency key (ULID), unique per order
    pub reference: String,
    pub transaction_hash: Option<String>,
    pub block_number: Option<i64>,
    pub user_address: String,
    pub fiat_account: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SwapOrder {
    /// Create a new pending order from a validated intent
    pub fn new(intent: &SwapIntent, direction: SwapDirection, reference: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: intent.user_id,
            direction,
            from_currency: intent.from_currency.clone(),
            to_currency: intent.to_currency.clone(),
            from_amount: intent.from_amount,
            to_amount: None,
            rate: intent.rate,
            fee: intent.fee,
            status: OrderStatus::Pending,
            reference,
            transaction_hash: None,
            block_number: None,
            user_address: intent.user_address.clone(),
            fiat_account: intent.fiat_account.clone(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

impl fmt::Display for SwapOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SwapOrder[{}] {} {} -> {} user={} amount={} status={}",
            self.id,
            self.direction,
            self.from_currency,
            self.to_currency,
            self.user_id,
            self.from_amount,
            self.status
        )
    }
}

/// Fields written by the conditional completion update
#[derive(Debug, Clone)]
pub struct CompletionUpdate {
    pub to_amount: Decimal,
    pub fee: Decimal,
    pub block_number: i64,
    pub transaction_hash: String,
    pub completed_at: DateTime<Utc>,
}

/// Settlement transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum SettlementStatus {
    Confirmed = 1,
    Completed = 2,
}

impl SettlementStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(SettlementStatus::Confirmed),
            2 => Some(SettlementStatus::Completed),
            _ => None,
        }
    }
}

/// Immutable ledger entry created once per completed leg of an order
///
/// Keyed by `reference` so re-processing the same event is a no-op upsert.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementTransaction {
    /// Linked order; None for deposits confirmed outside a swap lifecycle
    pub swap_order_id: Option<Uuid>,
    pub reference: String,
    pub currency: String,
    pub amount: Decimal,
    pub status: SettlementStatus,
    pub transaction_hash: Option<String>,
    pub block_number: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn intent() -> SwapIntent {
        SwapIntent {
            user_id: 1001,
            from_currency: "NGN".into(),
            to_currency: "USDC".into(),
            from_amount: Decimal::from(500000),
            rate: Decimal::new(166667, 2),
            fee: Decimal::from(2500),
            user_address: "0xabc".into(),
            fiat_account: Some("acct-1".into()),
        }
    }

    #[test]
    fn test_status_id_roundtrip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::PayoutFailed,
        ] {
            assert_eq!(OrderStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(OrderStatus::from_id(0), None);
        assert_eq!(OrderStatus::from_id(6), None);
    }

    #[test]
    fn test_status_matchable_set() {
        assert!(OrderStatus::Pending.is_matchable());
        assert!(OrderStatus::Processing.is_matchable());
        assert!(OrderStatus::PayoutFailed.is_matchable());
        assert!(!OrderStatus::Completed.is_matchable());
        assert!(!OrderStatus::Failed.is_matchable());
    }

    #[test]
    fn test_status_terminal_set() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::PayoutFailed.is_terminal());
    }

    #[test]
    fn test_new_order_starts_pending() {
        let order = SwapOrder::new(&intent(), SwapDirection::FiatToToken, "ref-1".into());
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.to_amount.is_none());
        assert!(order.transaction_hash.is_none());
        assert!(order.completed_at.is_none());
        assert_eq!(order.reference, "ref-1");
    }

    #[test]
    fn test_direction_id_roundtrip() {
        assert_eq!(SwapDirection::from_id(1), Some(SwapDirection::FiatToToken));
        assert_eq!(SwapDirection::from_id(2), Some(SwapDirection::TokenToFiat));
        assert_eq!(SwapDirection::from_id(3), None);
    }
}
