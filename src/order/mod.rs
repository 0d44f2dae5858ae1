//! Swap order lifecycle: types, persistence, and orchestration

pub mod error;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use error::SwapError;
pub use orchestrator::{OrchestratorConfig, SwapOrchestrator};
pub use store::{MemoryOrderStore, OrderStore, PgOrderStore};
pub use types::{
    CompletionUpdate, OrderStatus, SettlementStatus, SettlementTransaction, SwapDirection,
    SwapIntent, SwapOrder,
};
