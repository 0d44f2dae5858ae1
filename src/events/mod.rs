//! Ledger event ingestion and matching

pub mod gateway;
pub mod router;
pub mod types;

pub use gateway::EventGateway;
pub use router::EventRouter;
pub use types::{EventError, EventPayload, LedgerEvent, NotificationBody, RawEvent};
