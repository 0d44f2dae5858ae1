//! Event Router / Matcher
//!
//! Dispatches each normalized ledger event to its handler and performs the
//! core matching algorithm: decode the embedded order id, find the order in
//! a matchable state, recompute the settlement amount from the live rate
//! snapshot, complete the order through the store's conditional update, and
//! hand the completed order to the payout dispatcher.
//!
//! Event delivery is at-least-once; every handler here is idempotent and
//! every per-event failure is contained so one bad event never blocks a
//! batch.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::currency::{self, CurrencyRegistry};
use crate::felt;
use crate::order::error::SwapError;
use crate::order::store::OrderStore;
use crate::order::types::{
    CompletionUpdate, SettlementStatus, SettlementTransaction, SwapDirection, SwapOrder,
};
use crate::payout::PayoutDispatcher;
use crate::rates::{pair_rate, RateSource};

use super::types::{EventPayload, LedgerEvent};

pub struct EventRouter {
    store: Arc<dyn OrderStore>,
    rates: Arc<dyn RateSource>,
    dispatcher: Arc<PayoutDispatcher>,
    registry: Arc<CurrencyRegistry>,
    fee_bps: u32,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn OrderStore>,
        rates: Arc<dyn RateSource>,
        dispatcher: Arc<PayoutDispatcher>,
        registry: Arc<CurrencyRegistry>,
        fee_bps: u32,
    ) -> Self {
        Self {
            store,
            rates,
            dispatcher,
            registry,
            fee_bps,
        }
    }

    /// Process a normalized batch, containing every per-event failure.
    /// Returns the ids of orders completed by this batch.
    pub async fn process_batch(&self, events: &[LedgerEvent]) -> Vec<Uuid> {
        let mut completed = Vec::new();
        for event in events {
            match self.route(event).await {
                Ok(Some(order_id)) => completed.push(order_id),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        event_name = %event.name,
                        transaction_hash = %event.transaction_hash,
                        error = %e,
                        "Event handler failed, continuing batch"
                    );
                }
            }
        }
        completed
    }

    /// Dispatch one event. Returns the completed order id for swap
    /// confirmations, None otherwise.
    pub async fn route(&self, event: &LedgerEvent) -> Result<Option<Uuid>, SwapError> {
        match &event.payload {
            EventPayload::LiquidityAdded { symbol, amount } => {
                self.handle_liquidity(event, symbol, *amount).await?;
                Ok(None)
            }
            EventPayload::LiquidityRemoved { symbol, amount } => {
                self.handle_liquidity(event, symbol, -*amount).await?;
                Ok(None)
            }
            EventPayload::DepositConfirmed {
                reference,
                symbol,
                amount,
            } => {
                self.handle_deposit(event, reference, symbol, *amount).await?;
                Ok(None)
            }
            EventPayload::SwapExecuted {
                direction,
                order_id,
                from_symbol,
                to_symbol,
                onchain_amount,
            } => {
                self.handle_swap_executed(
                    event,
                    *direction,
                    order_id.as_deref(),
                    from_symbol,
                    to_symbol,
                    *onchain_amount,
                )
                .await
            }
            EventPayload::WithdrawalCompleted { reference } => {
                self.handle_withdrawal(reference).await?;
                Ok(None)
            }
            EventPayload::Unknown { name } => {
                debug!(event_name = %name, "Dropping unrecognized event");
                Ok(None)
            }
        }
    }

    /// Best-effort pool accounting: aggregate delta plus history row
    async fn handle_liquidity(
        &self,
        event: &LedgerEvent,
        symbol: &str,
        delta: Decimal,
    ) -> Result<(), SwapError> {
        self.store
            .record_liquidity_delta(symbol, delta, event.block_number, &event.transaction_hash)
            .await?;
        debug!(symbol = %symbol, delta = %delta, "Pool liquidity updated");
        Ok(())
    }

    /// Idempotent settlement upsert keyed by the event's external reference
    async fn handle_deposit(
        &self,
        event: &LedgerEvent,
        reference: &str,
        symbol: &str,
        amount: Decimal,
    ) -> Result<(), SwapError> {
        self.store
            .upsert_settlement(&SettlementTransaction {
                swap_order_id: None,
                reference: reference.to_string(),
                currency: symbol.to_string(),
                amount,
                status: SettlementStatus::Confirmed,
                transaction_hash: Some(event.transaction_hash.clone()),
                block_number: Some(event.block_number),
                created_at: Utc::now(),
            })
            .await?;
        info!(reference = %reference, amount = %amount, symbol = %symbol, "Deposit confirmed");
        Ok(())
    }

    /// Idempotent status update matched by external reference; a miss is
    /// expected under at-least-once delivery and only logged
    async fn handle_withdrawal(&self, reference: &str) -> Result<(), SwapError> {
        let updated = self
            .store
            .update_settlement_status(reference, SettlementStatus::Completed)
            .await?;
        if !updated {
            warn!(reference = %reference, "Withdrawal event matched no settlement, skipping");
        }
        Ok(())
    }

    /// The core matching algorithm: resolve, recompute, complete, settle,
    /// then hand off to payout
    async fn handle_swap_executed(
        &self,
        event: &LedgerEvent,
        direction: SwapDirection,
        order_id_felt: Option<&str>,
        from_symbol: &str,
        to_symbol: &str,
        onchain_amount: u128,
    ) -> Result<Option<Uuid>, SwapError> {
        let order = match self
            .resolve_order(order_id_felt, from_symbol, to_symbol)
            .await?
        {
            Some(order) => order,
            None => {
                // Expected under at-least-once delivery: the event may be
                // stale or already consumed by a concurrent worker
                warn!(
                    event_name = %event.name,
                    order_id_felt = ?order_id_felt,
                    "No matching order in an eligible state, no action taken"
                );
                return Ok(None);
            }
        };

        if order.direction != direction {
            warn!(
                order_id = %order.id,
                order_direction = %order.direction,
                event_direction = %direction,
                "Event direction does not match order, no action taken"
            );
            return Ok(None);
        }

        let (to_amount, fee) = self.settle_amounts(&order, onchain_amount).await?;

        let update = CompletionUpdate {
            to_amount,
            fee,
            block_number: event.block_number,
            transaction_hash: event.transaction_hash.clone(),
            completed_at: Utc::now(),
        };
        let settlement = SettlementTransaction {
            swap_order_id: Some(order.id),
            reference: order.reference.clone(),
            currency: order.to_currency.clone(),
            amount: to_amount,
            status: SettlementStatus::Confirmed,
            transaction_hash: Some(event.transaction_hash.clone()),
            block_number: Some(event.block_number),
            created_at: Utc::now(),
        };

        // One atomic write: status transition plus settlement row. A
        // transient store failure rolls both back, keeping the order
        // matchable for the next delivery.
        if !self
            .store
            .complete_and_settle(order.id, &update, &settlement)
            .await?
        {
            // Lost the conditional update: a concurrent delivery already
            // completed this order. Exactly-once holds, nothing to do.
            warn!(
                order_id = %order.id,
                "Completion CAS found no eligible order, duplicate delivery assumed"
            );
            return Ok(None);
        }

        info!(
            order_id = %order.id,
            reference = %order.reference,
            to_amount = %to_amount,
            fee = %fee,
            block_number = event.block_number,
            "Order completed from on-chain confirmation"
        );

        let completed = self
            .store
            .get(order.id)
            .await?
            .ok_or(SwapError::OrderNotFound(order.id))?;
        self.dispatcher.dispatch(completed);

        Ok(Some(order.id))
    }

    /// Resolve the target order: embedded id first, FIFO fallback second
    ///
    /// The fallback exists only for legacy event shapes without an embedded
    /// order id. It matches oldest-pending for the currency pair and can
    /// mismatch under concurrent same-pair orders, so it is logged loudly.
    async fn resolve_order(
        &self,
        order_id_felt: Option<&str>,
        from_symbol: &str,
        to_symbol: &str,
    ) -> Result<Option<SwapOrder>, SwapError> {
        if let Some(felt_value) = order_id_felt {
            let id = felt::decode_order_id(felt_value)?;
            return Ok(self
                .store
                .get(id)
                .await?
                .filter(|o| o.status.is_matchable()));
        }

        warn!(
            from_symbol = %from_symbol,
            to_symbol = %to_symbol,
            "Legacy event without embedded order id, falling back to FIFO pair matching"
        );
        self.store
            .find_oldest_matchable(from_symbol, to_symbol)
            .await
    }

    /// Recompute settlement from the live rate snapshot
    ///
    /// The event's on-chain amount is denominated in smallest units of the
    /// token leg. Token->fiat converts through the current cross rate and
    /// nets out the protocol fee; fiat->token settles the delivered token
    /// amount as-is, its fee having been taken on the fiat collection leg.
    async fn settle_amounts(
        &self,
        order: &SwapOrder,
        onchain_amount: u128,
    ) -> Result<(Decimal, Decimal), SwapError> {
        match order.direction {
            SwapDirection::TokenToFiat => {
                let token_major = currency::from_smallest_unit(
                    onchain_amount,
                    &order.from_currency,
                    &self.registry,
                )?;

                let rates = self
                    .rates
                    .get_rates(&[&order.from_currency, &order.to_currency])
                    .await
                    .map_err(|e| SwapError::Rates(e.to_string()))?;
                let rate = pair_rate(&rates, &order.from_currency, &order.to_currency)
                    .map_err(|e| SwapError::Rates(e.to_string()))?;

                let fee_fraction = Decimal::from(self.fee_bps) / Decimal::from(10_000u32);
                let gross = token_major * rate;
                let net = currency::round_to_scale(
                    gross * (Decimal::ONE - fee_fraction),
                    &order.to_currency,
                    &self.registry,
                )?;
                let fee = currency::round_to_scale(
                    gross * fee_fraction,
                    &order.to_currency,
                    &self.registry,
                )?;
                Ok((net, fee))
            }
            SwapDirection::FiatToToken => {
                let token_major = currency::from_smallest_unit(
                    onchain_amount,
                    &order.to_currency,
                    &self.registry,
                )?;
                Ok((token_major, order.fee))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_client::MockLedger;
    use crate::order::orchestrator::{OrchestratorConfig, SwapOrchestrator};
    use crate::order::store::MemoryOrderStore;
    use crate::order::types::{OrderStatus, SwapIntent};
    use crate::payout::MockPayout;
    use crate::rates::FixedRateSource;
    use std::str::FromStr;
    use std::time::Duration;

    const FEE_BPS: u32 = 250;

    struct Fixture {
        router: EventRouter,
        store: Arc<MemoryOrderStore>,
        payment: Arc<MockPayout>,
    }

    fn rates() -> Arc<FixedRateSource> {
        Arc::new(
            FixedRateSource::default()
                .with_rate("USDC", Decimal::ONE)
                .with_rate("NGN", Decimal::ONE / Decimal::from_str("1666.67").unwrap()),
        )
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryOrderStore::new());
        let payment = Arc::new(MockPayout::new(Decimal::from(100_000_000)));
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store.clone(),
            payment.clone(),
            Duration::from_secs(5),
        ));
        let router = EventRouter::new(
            store.clone(),
            rates(),
            dispatcher,
            Arc::new(CurrencyRegistry::with_defaults()),
            FEE_BPS,
        );
        Fixture {
            router,
            store,
            payment,
        }
    }

    async fn processing_order(store: &Arc<MemoryOrderStore>) -> SwapOrder {
        let intent = SwapIntent {
            user_id: 1,
            from_currency: "USDC".into(),
            to_currency: "NGN".into(),
            from_amount: Decimal::from(300),
            rate: Decimal::from_str("1666.67").unwrap(),
            fee: Decimal::ZERO,
            user_address: "0xuser".into(),
            fiat_account: Some("acct-1".into()),
        };
        let order = SwapOrder::new(
            &intent,
            SwapDirection::TokenToFiat,
            ulid::Ulid::new().to_string(),
        );
        store.create(&order).await.unwrap();
        store.mark_processing(order.id, "0xsubmit").await.unwrap();
        store.get(order.id).await.unwrap().unwrap()
    }

    fn swap_event(order_id: Option<&Uuid>, amount: &str) -> LedgerEvent {
        LedgerEvent {
            name: "TokenToFiatSwapExecuted".into(),
            block_number: 77,
            block_timestamp: Utc::now(),
            transaction_hash: "0xconfirm".into(),
            event_index: 0,
            payload: EventPayload::SwapExecuted {
                direction: SwapDirection::TokenToFiat,
                order_id: order_id.map(felt::encode_order_id),
                from_symbol: "USDC".into(),
                to_symbol: "NGN".into(),
                onchain_amount: amount.parse().unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn test_swap_event_completes_order_with_recomputed_amount() {
        let f = fixture();
        let order = processing_order(&f.store).await;

        // 300 USDC in micro-units
        let completed = f
            .router
            .route(&swap_event(Some(&order.id), "300000000"))
            .await
            .unwrap();
        assert_eq!(completed, Some(order.id));

        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.block_number, Some(77));
        assert_eq!(stored.transaction_hash.as_deref(), Some("0xconfirm"));

        // to_amount = 300 x (USDC/NGN cross) x (1 - 250/10000), scale 2
        let cross = Decimal::ONE / (Decimal::ONE / Decimal::from_str("1666.67").unwrap());
        let expected = (Decimal::from(300) * cross * Decimal::from_str("0.975").unwrap())
            .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
        assert_eq!(stored.to_amount, Some(expected));

        // Exactly one settlement carrying the order's reference
        assert_eq!(f.store.settlement_count().await, 1);
        let stx = f
            .store
            .get_settlement(&order.reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stx.swap_order_id, Some(order.id));
        assert_eq!(stx.amount, expected);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let f = fixture();
        let order = processing_order(&f.store).await;
        let event = swap_event(Some(&order.id), "300000000");

        assert!(f.router.route(&event).await.unwrap().is_some());
        // Second delivery: no completion, no second settlement
        assert!(f.router.route(&event).await.unwrap().is_none());
        assert_eq!(f.store.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_transient_store_failure_repaired_by_redelivery() {
        let f = fixture();
        let order = processing_order(&f.store).await;
        let event = swap_event(Some(&order.id), "300000000");

        f.store.fail_next_completion();
        assert!(f.router.route(&event).await.is_err());

        // Nothing landed halfway: still matchable, no settlement row
        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(f.store.settlement_count().await, 0);

        // Redelivery completes and settles in one step
        assert_eq!(f.router.route(&event).await.unwrap(), Some(order.id));
        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(f.store.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_order_id_zero_side_effects() {
        let f = fixture();
        let ghost = Uuid::new_v4();

        let result = f.router.route(&swap_event(Some(&ghost), "1000000")).await;
        assert!(result.unwrap().is_none());
        assert_eq!(f.store.settlement_count().await, 0);
        assert_eq!(f.payment.payout_count().await, 0);
    }

    #[tokio::test]
    async fn test_fifo_fallback_picks_oldest() {
        let f = fixture();
        let older = processing_order(&f.store).await;
        // Ensure a strictly later created_at for the second order
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = processing_order(&f.store).await;

        let completed = f
            .router
            .route(&swap_event(None, "300000000"))
            .await
            .unwrap();
        assert_eq!(completed, Some(older.id));

        let newer_stored = f.store.get(newer.id).await.unwrap().unwrap();
        assert_eq!(newer_stored.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_direction_mismatch_no_action() {
        let f = fixture();
        let order = processing_order(&f.store).await;

        let mut event = swap_event(Some(&order.id), "300000000");
        event.payload = EventPayload::SwapExecuted {
            direction: SwapDirection::FiatToToken,
            order_id: Some(felt::encode_order_id(&order.id)),
            from_symbol: "USDC".into(),
            to_symbol: "NGN".into(),
            onchain_amount: 300_000_000,
        };

        assert!(f.router.route(&event).await.unwrap().is_none());
        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_deposit_event_upserts_once() {
        let f = fixture();
        let event = LedgerEvent {
            name: "DepositConfirmed".into(),
            block_number: 5,
            block_timestamp: Utc::now(),
            transaction_hash: "0xdep".into(),
            event_index: 0,
            payload: EventPayload::DepositConfirmed {
                reference: "dep-ref-1".into(),
                symbol: "USDC".into(),
                amount: Decimal::from(100),
            },
        };

        f.router.route(&event).await.unwrap();
        f.router.route(&event).await.unwrap();
        assert_eq!(f.store.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_withdrawal_miss_is_logged_not_fatal() {
        let f = fixture();
        let event = LedgerEvent {
            name: "WithdrawalCompleted".into(),
            block_number: 5,
            block_timestamp: Utc::now(),
            transaction_hash: "0xwd".into(),
            event_index: 0,
            payload: EventPayload::WithdrawalCompleted {
                reference: "missing-ref".into(),
            },
        };
        assert!(f.router.route(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_liquidity_events_update_aggregate_and_history() {
        let f = fixture();
        for (payload, _) in [
            (
                EventPayload::LiquidityAdded {
                    symbol: "USDC".into(),
                    amount: Decimal::from(1000),
                },
                1,
            ),
            (
                EventPayload::LiquidityRemoved {
                    symbol: "USDC".into(),
                    amount: Decimal::from(400),
                },
                2,
            ),
        ] {
            let event = LedgerEvent {
                name: "Liquidity".into(),
                block_number: 9,
                block_timestamp: Utc::now(),
                transaction_hash: "0xliq".into(),
                event_index: 0,
                payload,
            };
            f.router.route(&event).await.unwrap();
        }

        assert_eq!(
            f.store.liquidity_balance("USDC").await,
            Some(Decimal::from(600))
        );
        assert_eq!(f.store.liquidity_history_len().await, 2);
    }

    #[tokio::test]
    async fn test_batch_contains_per_event_failures() {
        let f = fixture();
        let order = processing_order(&f.store).await;

        // An amount overflowing the smallest-unit conversion fails one
        // event, not the batch
        let mut broken = swap_event(Some(&order.id), "300000000");
        broken.payload = EventPayload::SwapExecuted {
            direction: SwapDirection::TokenToFiat,
            order_id: Some(felt::encode_order_id(&order.id)),
            from_symbol: "USDC".into(),
            to_symbol: "NGN".into(),
            onchain_amount: u128::MAX, // overflows smallest-unit conversion
        };
        let good = swap_event(Some(&order.id), "300000000");

        let completed = f.router.process_batch(&[broken, good]).await;
        assert_eq!(completed, vec![order.id]);
    }

    #[tokio::test]
    async fn test_payout_dispatched_after_completion() {
        let f = fixture();
        let order = processing_order(&f.store).await;

        f.router
            .route(&swap_event(Some(&order.id), "300000000"))
            .await
            .unwrap();

        // Payout runs on a spawned task; give it a beat
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.payment.payout_count().await, 1);
        let (dest, _, currency) = f.payment.last_payout().await.unwrap();
        assert_eq!(dest, "acct-1");
        assert_eq!(currency, "NGN");
    }

    #[tokio::test]
    async fn test_orchestrator_to_router_full_cycle() {
        // End-to-end inside the module: submit via orchestrator, confirm via
        // router, payout fires
        let store = Arc::new(MemoryOrderStore::new());
        let ledger = Arc::new(MockLedger::new());
        let payment = Arc::new(MockPayout::new(Decimal::from(100_000_000)));
        let registry = Arc::new(CurrencyRegistry::with_defaults());
        let orchestrator = SwapOrchestrator::new(
            store.clone(),
            ledger.clone(),
            rates(),
            payment.clone(),
            registry.clone(),
            OrchestratorConfig {
                contract_address: "0xswap".into(),
                fee_bps: FEE_BPS,
                ..Default::default()
            },
        );
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store.clone(),
            payment.clone(),
            Duration::from_secs(5),
        ));
        let router = EventRouter::new(store.clone(), rates(), dispatcher, registry, FEE_BPS);

        ledger.set_balance("0xuser", "USDC", Decimal::from(500)).await;
        let intent = SwapIntent {
            user_id: 1,
            from_currency: "USDC".into(),
            to_currency: "NGN".into(),
            from_amount: Decimal::from(300),
            rate: Decimal::from_str("1666.67").unwrap(),
            fee: Decimal::ZERO,
            user_address: "0xuser".into(),
            fiat_account: Some("acct-1".into()),
        };
        let order = orchestrator.create_order(intent).await.unwrap();
        orchestrator.execute_swap(order.id).await.unwrap();

        router
            .route(&swap_event(Some(&order.id), "300000000"))
            .await
            .unwrap();

        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(payment.payout_count().await, 1);
    }
}
