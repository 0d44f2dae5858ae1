//! swapbridge - Swap Order Lifecycle & Event Correlation
//!
//! Bridges fiat money movements with on-chain token swaps: a swap intent is
//! validated and submitted to an external ledger, tracked through an
//! asynchronous execution pipeline, and reconciled exactly once against a
//! stream of later, possibly duplicated, possibly out-of-order event
//! notifications before any fiat payout is made.
//!
//! # Modules
//!
//! - [`currency`] - Fixed-point arithmetic and per-currency scale rules
//! - [`felt`] - Order id <-> ledger scalar field codec
//! - [`order`] - Swap order types, store, and orchestrator
//! - [`events`] - Event ingestion gateway and router/matcher
//! - [`ledger_client`] - External ledger boundary
//! - [`rates`] - Exchange rate snapshots (read-only, TTL-cached)
//! - [`payout`] - Fiat payout trigger (isolated failure domain)
//! - [`db`] - PostgreSQL pool management
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod currency;
pub mod db;
pub mod events;
pub mod felt;
pub mod ledger_client;
pub mod logging;
pub mod order;
pub mod payout;
pub mod rates;

// Convenient re-exports at crate root
pub use config::{AppConfig, SwapConfig};
pub use currency::{CurrencyError, CurrencyInfo, CurrencyRegistry};
pub use events::{EventGateway, EventPayload, EventRouter, LedgerEvent};
pub use felt::{decode_order_id, encode_order_id, FeltError};
pub use ledger_client::{LedgerClient, LedgerError, LedgerReceipt, MockLedger};
pub use order::{
    MemoryOrderStore, OrchestratorConfig, OrderStatus, OrderStore, PgOrderStore, SettlementStatus,
    SettlementTransaction, SwapDirection, SwapError, SwapIntent, SwapOrchestrator, SwapOrder,
};
pub use payout::{MockPayout, PayoutClient, PayoutDispatcher, PayoutError, PayoutReceipt};
pub use rates::{pair_rate, CachedRateSource, FixedRateSource, RateError, RateSource};
