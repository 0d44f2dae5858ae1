//! Ledger Client Boundary
//!
//! Thin trait over the external blockchain contract. Signing, ABI encoding
//! and RPC plumbing live behind this boundary; the core only submits calls
//! and reads confirmations. Outcomes of dispatched calls are learned through
//! the event feed, so `submit` is fire-and-forget once accepted.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Ledger call rejected: {0}")]
    Rejected(String),

    #[error("Confirmation wait timed out")]
    Timeout,

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),
}

/// Receipt returned once a transaction is confirmed on-chain
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    pub transaction_hash: String,
    pub block_number: i64,
    pub succeeded: bool,
}

#[async_trait]
pub trait LedgerClient: Send + Sync + Debug {
    /// Submit a contract call. Returns the transaction hash on acceptance.
    async fn submit(
        &self,
        contract_address: &str,
        entrypoint: &str,
        calldata: &[String],
    ) -> Result<String, LedgerError>;

    /// Block until the transaction is confirmed (bounded by the caller's
    /// timeout, not by this trait).
    async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<LedgerReceipt, LedgerError>;

    /// On-chain token balance for an address, in major units
    async fn get_onchain_balance(&self, address: &str, symbol: &str)
        -> Result<Decimal, LedgerError>;

    /// Whether the address is registered with the swap contract
    async fn is_registered(&self, address: &str) -> Result<bool, LedgerError>;
}

/// Mock ledger for tests and local wiring
///
/// Balances and registrations are seeded up front; submissions record the
/// calldata and hand back a deterministic-looking fake hash.
#[derive(Debug, Default)]
pub struct MockLedger {
    balances: Mutex<HashMap<(String, String), Decimal>>,
    registered: Mutex<Vec<String>>,
    submissions: Mutex<Vec<(String, String, Vec<String>)>>,
    reject_next: AtomicBool,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, address: &str, symbol: &str, amount: Decimal) {
        self.balances
            .lock()
            .await
            .insert((address.to_string(), symbol.to_string()), amount);
    }

    pub async fn register(&self, address: &str) {
        self.registered.lock().await.push(address.to_string());
    }

    /// Make the next submit call fail with a rejection
    pub fn reject_next_submit(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.lock().await.len()
    }

    pub async fn last_calldata(&self) -> Option<Vec<String>> {
        self.submissions.lock().await.last().map(|s| s.2.clone())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit(
        &self,
        contract_address: &str,
        entrypoint: &str,
        calldata: &[String],
    ) -> Result<String, LedgerError> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Rejected("simulated rejection".into()));
        }
        self.submissions.lock().await.push((
            contract_address.to_string(),
            entrypoint.to_string(),
            calldata.to_vec(),
        ));
        let tx_id = uuid::Uuid::new_v4();
        Ok(format!("0x{:x}", tx_id.simple()))
    }

    async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<LedgerReceipt, LedgerError> {
        Ok(LedgerReceipt {
            transaction_hash: tx_hash.to_string(),
            block_number: 1,
            succeeded: true,
        })
    }

    async fn get_onchain_balance(
        &self,
        address: &str,
        symbol: &str,
    ) -> Result<Decimal, LedgerError> {
        Ok(self
            .balances
            .lock()
            .await
            .get(&(address.to_string(), symbol.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn is_registered(&self, address: &str) -> Result<bool, LedgerError> {
        Ok(self
            .registered
            .lock()
            .await
            .iter()
            .any(|a| a == address))
    }
}
