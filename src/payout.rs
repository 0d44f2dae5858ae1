//! Payout Trigger
//!
//! Fiat payout is attempted strictly after an order reaches `completed`,
//! as a follow-up task decoupled from event processing so a slow or failing
//! payout never blocks ingestion throughput. Failure converts the order to
//! `payout_failed` (retryable); it never unwinds the completion.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::order::error::SwapError;
use crate::order::store::OrderStore;
use crate::order::types::{SwapDirection, SwapOrder};

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Payout rejected: {0}")]
    Rejected(String),

    #[error("Insufficient fiat liquidity")]
    InsufficientLiquidity,

    #[error("Network error: {0}")]
    Network(String),
}

/// Receipt from the fiat rail
#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    pub reference: String,
    pub status: String,
}

/// Fiat payment rail boundary: payouts, charges, and liquidity checks
#[async_trait]
pub trait PayoutClient: Send + Sync + Debug {
    /// Initiate a fiat transfer to the destination account
    async fn initiate_payout(
        &self,
        destination_account: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<PayoutReceipt, PayoutError>;

    /// Charge/reserve fiat from a funded source (fiat->token collection
    /// leg). `reference` is the order's idempotency key; the rail must
    /// deduplicate on it so a retried pre-flight never double-charges.
    async fn charge(
        &self,
        source_account: &str,
        amount: Decimal,
        currency: &str,
        reference: &str,
    ) -> Result<PayoutReceipt, PayoutError>;

    /// Available fiat liquidity for a currency
    async fn get_liquidity(&self, currency: &str) -> Result<Decimal, PayoutError>;
}

/// Dispatches payouts for completed orders on a spawned task
///
/// The isolated failure domain of the payout leg: every error is caught
/// here and converted into a `payout_failed` status transition.
pub struct PayoutDispatcher {
    store: Arc<dyn OrderStore>,
    client: Arc<dyn PayoutClient>,
    timeout: Duration,
}

impl PayoutDispatcher {
    pub fn new(store: Arc<dyn OrderStore>, client: Arc<dyn PayoutClient>, timeout: Duration) -> Self {
        Self {
            store,
            client,
            timeout,
        }
    }

    /// Queue the payout follow-up for a just-completed order
    pub fn dispatch(self: &Arc<Self>, order: SwapOrder) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.run_payout(&order).await {
                warn!(
                    order_id = %order.id,
                    error = %e,
                    "Payout failed, order marked payout_failed"
                );
            }
        })
    }

    /// Execute the payout leg for one order
    ///
    /// No-op for fiat->token orders: their value leg was delivered on-chain
    /// and confirmed by the matching event.
    pub async fn run_payout(&self, order: &SwapOrder) -> Result<(), SwapError> {
        if order.direction != SwapDirection::TokenToFiat {
            debug!(order_id = %order.id, "No fiat payout required for {}", order.direction);
            return Ok(());
        }

        let amount = order
            .to_amount
            .ok_or_else(|| SwapError::Payout("order has no settled amount".into()))?;

        let destination = match order.fiat_account.as_deref() {
            Some(account) => account,
            None => {
                self.store
                    .mark_payout_failed(order.id, "missing payout account")
                    .await?;
                return Err(SwapError::Payout("missing payout account".into()));
            }
        };

        let result = tokio::time::timeout(
            self.timeout,
            self.client
                .initiate_payout(destination, amount, &order.to_currency),
        )
        .await;

        match result {
            Ok(Ok(receipt)) => {
                info!(
                    order_id = %order.id,
                    payout_reference = %receipt.reference,
                    amount = %amount,
                    currency = %order.to_currency,
                    "Payout initiated"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.store
                    .mark_payout_failed(order.id, &e.to_string())
                    .await?;
                Err(SwapError::Payout(e.to_string()))
            }
            Err(_) => {
                self.store
                    .mark_payout_failed(order.id, "payout timed out")
                    .await?;
                Err(SwapError::Payout("payout timed out".into()))
            }
        }
    }
}

/// Mock fiat rail for tests and local wiring
///
/// Charges deduplicate on the caller's reference, matching the contract a
/// real rail is expected to honor.
#[derive(Debug)]
pub struct MockPayout {
    liquidity: Mutex<Decimal>,
    payouts: Mutex<Vec<(String, Decimal, String)>>,
    charges: Mutex<Vec<(String, Decimal, String, String)>>,
    fail_payouts: AtomicBool,
    fail_charges: AtomicBool,
    delay_ms: AtomicU64,
}

impl MockPayout {
    pub fn new(liquidity: Decimal) -> Self {
        Self {
            liquidity: Mutex::new(liquidity),
            payouts: Mutex::new(Vec::new()),
            charges: Mutex::new(Vec::new()),
            fail_payouts: AtomicBool::new(false),
            fail_charges: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_fail_payouts(&self, fail: bool) {
        self.fail_payouts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_charges(&self, fail: bool) {
        self.fail_charges.store(fail, Ordering::SeqCst);
    }

    /// Stall every rail call by this long (for timeout tests)
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn payout_count(&self) -> usize {
        self.payouts.lock().await.len()
    }

    pub async fn charge_count(&self) -> usize {
        self.charges.lock().await.len()
    }

    pub async fn last_payout(&self) -> Option<(String, Decimal, String)> {
        self.payouts.lock().await.last().cloned()
    }

    async fn stall(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl PayoutClient for MockPayout {
    async fn initiate_payout(
        &self,
        destination_account: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<PayoutReceipt, PayoutError> {
        self.stall().await;
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(PayoutError::Rejected("simulated rail failure".into()));
        }
        self.payouts.lock().await.push((
            destination_account.to_string(),
            amount,
            currency.to_string(),
        ));
        Ok(PayoutReceipt {
            reference: ulid::Ulid::new().to_string(),
            status: "initiated".into(),
        })
    }

    async fn charge(
        &self,
        source_account: &str,
        amount: Decimal,
        currency: &str,
        reference: &str,
    ) -> Result<PayoutReceipt, PayoutError> {
        self.stall().await;
        if self.fail_charges.load(Ordering::SeqCst) {
            return Err(PayoutError::Rejected("card declined".into()));
        }
        let mut charges = self.charges.lock().await;
        // Rail-side dedup: a replayed reference returns the prior outcome
        if charges.iter().any(|c| c.3 == reference) {
            return Ok(PayoutReceipt {
                reference: reference.to_string(),
                status: "charged".into(),
            });
        }
        charges.push((
            source_account.to_string(),
            amount,
            currency.to_string(),
            reference.to_string(),
        ));
        Ok(PayoutReceipt {
            reference: reference.to_string(),
            status: "charged".into(),
        })
    }

    async fn get_liquidity(&self, _currency: &str) -> Result<Decimal, PayoutError> {
        Ok(*self.liquidity.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::store::MemoryOrderStore;
    use crate::order::types::{
        CompletionUpdate, OrderStatus, SettlementStatus, SettlementTransaction, SwapIntent,
    };
    use chrono::Utc;

    fn completed_order(store_fiat_account: bool) -> SwapOrder {
        let intent = SwapIntent {
            user_id: 7,
            from_currency: "USDC".into(),
            to_currency: "NGN".into(),
            from_amount: Decimal::from(300),
            rate: Decimal::new(166667, 2),
            fee: Decimal::ZERO,
            user_address: "0xabc".into(),
            fiat_account: store_fiat_account.then(|| "acct-9".to_string()),
        };
        let mut order = SwapOrder::new(&intent, SwapDirection::TokenToFiat, "ref-p".into());
        order.status = OrderStatus::Completed;
        order.to_amount = Some(Decimal::from(487500));
        order
    }

    async fn seeded_store(order: &SwapOrder) -> Arc<MemoryOrderStore> {
        let store = Arc::new(MemoryOrderStore::new());
        let mut pending = order.clone();
        pending.status = OrderStatus::Pending;
        store.create(&pending).await.unwrap();
        store
            .complete_and_settle(
                order.id,
                &CompletionUpdate {
                    to_amount: order.to_amount.unwrap(),
                    fee: order.fee,
                    block_number: 1,
                    transaction_hash: "0x1".into(),
                    completed_at: Utc::now(),
                },
                &SettlementTransaction {
                    swap_order_id: Some(order.id),
                    reference: order.reference.clone(),
                    currency: order.to_currency.clone(),
                    amount: order.to_amount.unwrap(),
                    status: SettlementStatus::Confirmed,
                    transaction_hash: Some("0x1".into()),
                    block_number: Some(1),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_payout_success_keeps_completed() {
        let order = completed_order(true);
        let store = seeded_store(&order).await;
        let client = Arc::new(MockPayout::new(Decimal::from(1_000_000)));
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store.clone(),
            client.clone(),
            Duration::from_secs(5),
        ));

        dispatcher.dispatch(order.clone()).await.unwrap();

        assert_eq!(client.payout_count().await, 1);
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_payout_failure_marks_payout_failed() {
        let order = completed_order(true);
        let store = seeded_store(&order).await;
        let client = Arc::new(MockPayout::new(Decimal::from(1_000_000)));
        client.set_fail_payouts(true);
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store.clone(),
            client.clone(),
            Duration::from_secs(5),
        ));

        // Task swallows the error; the status transition is the outcome
        dispatcher.dispatch(order.clone()).await.unwrap();

        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::PayoutFailed);
        // Completion fields survive the payout failure
        assert_eq!(stored.to_amount, Some(Decimal::from(487500)));
    }

    #[tokio::test]
    async fn test_payout_skipped_for_fiat_to_token() {
        let mut order = completed_order(true);
        order.direction = SwapDirection::FiatToToken;
        let store = seeded_store(&order).await;
        let client = Arc::new(MockPayout::new(Decimal::ZERO));
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store,
            client.clone(),
            Duration::from_secs(5),
        ));

        dispatcher.run_payout(&order).await.unwrap();
        assert_eq!(client.payout_count().await, 0);
    }

    #[tokio::test]
    async fn test_payout_missing_account_marks_payout_failed() {
        let order = completed_order(false);
        let store = seeded_store(&order).await;
        let client = Arc::new(MockPayout::new(Decimal::from(1_000_000)));
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store.clone(),
            client,
            Duration::from_secs(5),
        ));

        assert!(dispatcher.run_payout(&order).await.is_err());
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::PayoutFailed);
    }
}
