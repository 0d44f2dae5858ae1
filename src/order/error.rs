//! Swap order error taxonomy
//!
//! Validation and funds errors propagate to the orchestrator's caller;
//! event-processing errors are contained per-event; payout errors are
//! contained per-order and never unwind a confirmed completion.

use thiserror::Error;
use uuid::Uuid;

use crate::currency::CurrencyError;
use crate::felt::FeltError;
use crate::order::types::OrderStatus;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Transient ledger error: {0}")]
    TransientLedger(String),

    #[error("No matching order for event: {0}")]
    NoMatchingOrder(String),

    #[error("Payout error: {0}")]
    Payout(String),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// Resubmission guard: the order is already past `pending`
    #[error("Order {order_id} not executable in status {status}")]
    InvalidStatus {
        order_id: Uuid,
        status: OrderStatus,
    },

    #[error("Rate source error: {0}")]
    Rates(String),

    #[error("Currency error: {0}")]
    Currency(#[from] CurrencyError),

    #[error("Identifier codec error: {0}")]
    Codec(#[from] FeltError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
