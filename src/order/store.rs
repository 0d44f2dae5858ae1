//! Order Store
//!
//! Persistence for swap orders and derived settlement transactions.
//! All status transitions use atomic CAS updates (`UPDATE ... WHERE status
//! IN (...)` with rows-affected checks) so that concurrent workers and
//! duplicate event deliveries can never double-complete an order. The
//! completion transition and its settlement row are written in a single
//! transaction; a failure rolls both back and leaves the order matchable.
//!
//! Tables (Postgres):
//! - `swap_orders_tb`: id (uuid PK), user_id, direction, from_currency,
//!   to_currency, from_amount, to_amount, rate, fee, status, reference
//!   (UNIQUE), transaction_hash, block_number, user_address, fiat_account,
//!   error_message, created_at, completed_at
//! - `settlement_tx_tb`: reference (UNIQUE), swap_order_id, currency,
//!   amount, status, transaction_hash, block_number, created_at
//! - `pool_liquidity_tb`: symbol (PK), balance, updated_at
//! - `pool_liquidity_history_tb`: append-only (symbol, delta, block_number,
//!   transaction_hash, created_at)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::SwapError;
use super::types::{
    CompletionUpdate, OrderStatus, SettlementStatus, SettlementTransaction, SwapDirection,
    SwapOrder,
};

/// Storage boundary for the orchestrator and the event matcher
///
/// Constructor-injected so tests substitute [`MemoryOrderStore`]; the
/// production implementation is [`PgOrderStore`].
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new pending order. The unique `reference` constraint makes
    /// duplicate inserts fail loudly rather than silently fork an order.
    async fn create(&self, order: &SwapOrder) -> Result<(), SwapError>;

    async fn get(&self, id: Uuid) -> Result<Option<SwapOrder>, SwapError>;

    async fn get_by_reference(&self, reference: &str) -> Result<Option<SwapOrder>, SwapError>;

    /// CAS `pending -> processing`, attaching the ledger transaction hash.
    /// Returns false if the order was not in `pending` (duplicate trigger).
    async fn mark_processing(&self, id: Uuid, tx_hash: &str) -> Result<bool, SwapError>;

    /// CAS `pending -> failed` with an error message, for pre-submission
    /// failures. Returns false if the order already left `pending`.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, SwapError>;

    /// The core exactly-once transition: complete the order and write its
    /// settlement row in one atomic step, only if the current status is in
    /// the matchable set {pending, processing, payout_failed}. Returns false
    /// when another delivery won the race or the order is terminal. On error
    /// neither write is visible, so redelivery can repair a transient
    /// failure.
    async fn complete_and_settle(
        &self,
        id: Uuid,
        update: &CompletionUpdate,
        stx: &SettlementTransaction,
    ) -> Result<bool, SwapError>;

    /// CAS `completed -> payout_failed`. Never touches any other status, so
    /// a payout failure cannot unwind a completion that didn't happen.
    async fn mark_payout_failed(&self, id: Uuid, error: &str) -> Result<bool, SwapError>;

    /// CAS `payout_failed -> completed` after a successful payout retry.
    async fn mark_payout_recovered(&self, id: Uuid) -> Result<bool, SwapError>;

    /// FIFO fallback lookup: oldest matchable order for a currency pair.
    /// Only used for legacy events lacking an embedded order id.
    async fn find_oldest_matchable(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<Option<SwapOrder>, SwapError>;

    /// Idempotent settlement upsert keyed by `reference`. Duplicate delivery
    /// updates the row in place, never creates a second one. Returns true if
    /// a row was written (insert or update).
    async fn upsert_settlement(&self, stx: &SettlementTransaction) -> Result<bool, SwapError>;

    async fn get_settlement(
        &self,
        reference: &str,
    ) -> Result<Option<SettlementTransaction>, SwapError>;

    /// Idempotent settlement status update by external reference.
    /// Returns false on a miss (expected for stale events, logged upstream).
    async fn update_settlement_status(
        &self,
        reference: &str,
        status: SettlementStatus,
    ) -> Result<bool, SwapError>;

    /// Best-effort pool accounting: aggregate upsert plus an immutable
    /// history row.
    async fn record_liquidity_delta(
        &self,
        symbol: &str,
        delta: Decimal,
        block_number: i64,
        transaction_hash: &str,
    ) -> Result<(), SwapError>;
}

// ============================================================================
// PostgreSQL implementation
// ============================================================================

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<SwapOrder, SwapError> {
        let status_id: i16 = row.get("status");
        let status = OrderStatus::from_id(status_id).ok_or_else(|| {
            SwapError::Validation(format!("invalid status id in store: {}", status_id))
        })?;

        let direction_id: i16 = row.get("direction");
        let direction = SwapDirection::from_id(direction_id).ok_or_else(|| {
            SwapError::Validation(format!("invalid direction id in store: {}", direction_id))
        })?;

        Ok(SwapOrder {
            id: row.get("id"),
            user_id: row.get("user_id"),
            direction,
            from_currency: row.get("from_currency"),
            to_currency: row.get("to_currency"),
            from_amount: row.get("from_amount"),
            to_amount: row.get("to_amount"),
            rate: row.get("rate"),
            fee: row.get("fee"),
            status,
            reference: row.get("reference"),
            transaction_hash: row.get("transaction_hash"),
            block_number: row.get("block_number"),
            user_address: row.get("user_address"),
            fiat_account: row.get("fiat_account"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            completed_at: row.get("completed_at"),
        })
    }

    fn row_to_settlement(row: &sqlx::postgres::PgRow) -> Result<SettlementTransaction, SwapError> {
        let status_id: i16 = row.get("status");
        let status = SettlementStatus::from_id(status_id).ok_or_else(|| {
            SwapError::Validation(format!("invalid settlement status: {}", status_id))
        })?;

        Ok(SettlementTransaction {
            swap_order_id: row.get("swap_order_id"),
            reference: row.get("reference"),
            currency: row.get("currency"),
            amount: row.get("amount"),
            status,
            transaction_hash: row.get("transaction_hash"),
            block_number: row.get("block_number"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        })
    }

    const ORDER_COLUMNS: &'static str = "id, user_id, direction, from_currency, to_currency, \
         from_amount, to_amount, rate, fee, status, reference, transaction_hash, \
         block_number, user_address, fiat_account, created_at, completed_at";
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &SwapOrder) -> Result<(), SwapError> {
        sqlx::query(
            r#"
            INSERT INTO swap_orders_tb
                (id, user_id, direction, from_currency, to_currency, from_amount,
                 rate, fee, status, reference, user_address, fiat_account, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.direction.id())
        .bind(&order.from_currency)
        .bind(&order.to_currency)
        .bind(order.from_amount)
        .bind(order.rate)
        .bind(order.fee)
        .bind(order.status.id())
        .bind(&order.reference)
        .bind(&order.user_address)
        .bind(&order.fiat_account)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SwapOrder>, SwapError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM swap_orders_tb WHERE id = $1",
            Self::ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<SwapOrder>, SwapError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM swap_orders_tb WHERE reference = $1",
            Self::ORDER_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn mark_processing(&self, id: Uuid, tx_hash: &str) -> Result<bool, SwapError> {
        let result = sqlx::query(
            r#"
            UPDATE swap_orders_tb
            SET status = $1, transaction_hash = $2
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(OrderStatus::Processing.id())
        .bind(tx_hash)
        .bind(id)
        .bind(OrderStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, SwapError> {
        let result = sqlx::query(
            r#"
            UPDATE swap_orders_tb
            SET status = $1, error_message = $2
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(OrderStatus::Failed.id())
        .bind(error)
        .bind(id)
        .bind(OrderStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_and_settle(
        &self,
        id: Uuid,
        update: &CompletionUpdate,
        stx: &SettlementTransaction,
    ) -> Result<bool, SwapError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE swap_orders_tb
            SET status = $1, to_amount = $2, fee = $3, block_number = $4,
                transaction_hash = $5, completed_at = $6
            WHERE id = $7 AND status = ANY($8)
            "#,
        )
        .bind(OrderStatus::Completed.id())
        .bind(update.to_amount)
        .bind(update.fee)
        .bind(update.block_number)
        .bind(&update.transaction_hash)
        .bind(update.completed_at)
        .bind(id)
        .bind(OrderStatus::matchable_ids().to_vec())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO settlement_tx_tb
                (reference, swap_order_id, currency, amount, status,
                 transaction_hash, block_number, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (reference)
            DO UPDATE SET status = EXCLUDED.status,
                          transaction_hash = EXCLUDED.transaction_hash,
                          block_number = EXCLUDED.block_number
            "#,
        )
        .bind(&stx.reference)
        .bind(stx.swap_order_id)
        .bind(&stx.currency)
        .bind(stx.amount)
        .bind(stx.status.id())
        .bind(&stx.transaction_hash)
        .bind(stx.block_number)
        .bind(stx.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_payout_failed(&self, id: Uuid, error: &str) -> Result<bool, SwapError> {
        let result = sqlx::query(
            r#"
            UPDATE swap_orders_tb
            SET status = $1, error_message = $2
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(OrderStatus::PayoutFailed.id())
        .bind(error)
        .bind(id)
        .bind(OrderStatus::Completed.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_payout_recovered(&self, id: Uuid) -> Result<bool, SwapError> {
        let result = sqlx::query(
            r#"
            UPDATE swap_orders_tb
            SET status = $1, error_message = NULL
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(OrderStatus::Completed.id())
        .bind(id)
        .bind(OrderStatus::PayoutFailed.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_oldest_matchable(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<Option<SwapOrder>, SwapError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM swap_orders_tb \
             WHERE from_currency = $1 AND to_currency = $2 AND status = ANY($3) \
             ORDER BY created_at ASC LIMIT 1",
            Self::ORDER_COLUMNS
        ))
        .bind(from_currency)
        .bind(to_currency)
        .bind(OrderStatus::matchable_ids().to_vec())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn upsert_settlement(&self, stx: &SettlementTransaction) -> Result<bool, SwapError> {
        let result = sqlx::query(
            r#"
            INSERT INTO settlement_tx_tb
                (reference, swap_order_id, currency, amount, status,
                 transaction_hash, block_number, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (reference)
            DO UPDATE SET status = EXCLUDED.status,
                          transaction_hash = EXCLUDED.transaction_hash,
                          block_number = EXCLUDED.block_number
            "#,
        )
        .bind(&stx.reference)
        .bind(stx.swap_order_id)
        .bind(&stx.currency)
        .bind(stx.amount)
        .bind(stx.status.id())
        .bind(&stx.transaction_hash)
        .bind(stx.block_number)
        .bind(stx.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_settlement(
        &self,
        reference: &str,
    ) -> Result<Option<SettlementTransaction>, SwapError> {
        let row = sqlx::query(
            "SELECT reference, swap_order_id, currency, amount, status, \
             transaction_hash, block_number, created_at \
             FROM settlement_tx_tb WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_settlement(&r)).transpose()
    }

    async fn update_settlement_status(
        &self,
        reference: &str,
        status: SettlementStatus,
    ) -> Result<bool, SwapError> {
        let result = sqlx::query(
            "UPDATE settlement_tx_tb SET status = $1 WHERE reference = $2",
        )
        .bind(status.id())
        .bind(reference)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_liquidity_delta(
        &self,
        symbol: &str,
        delta: Decimal,
        block_number: i64,
        transaction_hash: &str,
    ) -> Result<(), SwapError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pool_liquidity_tb (symbol, balance, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (symbol)
            DO UPDATE SET balance = pool_liquidity_tb.balance + EXCLUDED.balance,
                          updated_at = NOW()
            "#,
        )
        .bind(symbol)
        .bind(delta)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO pool_liquidity_history_tb
                (symbol, delta, block_number, transaction_hash, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(symbol)
        .bind(delta)
        .bind(block_number)
        .bind(transaction_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// In-memory implementation (tests, local wiring)
// ============================================================================

#[derive(Default)]
struct MemoryState {
    orders: HashMap<Uuid, SwapOrder>,
    settlements: HashMap<String, SettlementTransaction>,
    liquidity: HashMap<String, Decimal>,
    liquidity_history: Vec<(String, Decimal, i64, String)>,
}

/// In-memory store with the same CAS semantics as [`PgOrderStore`]
///
/// A single mutex over the whole state makes every operation atomic, so
/// the race behavior under test matches the conditional-update contract.
#[derive(Default)]
pub struct MemoryOrderStore {
    state: Mutex<MemoryState>,
    fail_next_completion: AtomicBool,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next completion attempt fail before writing anything,
    /// simulating a rolled-back transaction
    pub fn fail_next_completion(&self) {
        self.fail_next_completion.store(true, Ordering::SeqCst);
    }

    /// Number of settlement rows (assertion helper)
    pub async fn settlement_count(&self) -> usize {
        self.state.lock().await.settlements.len()
    }

    pub async fn liquidity_balance(&self, symbol: &str) -> Option<Decimal> {
        self.state.lock().await.liquidity.get(symbol).copied()
    }

    pub async fn liquidity_history_len(&self) -> usize {
        self.state.lock().await.liquidity_history.len()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create(&self, order: &SwapOrder) -> Result<(), SwapError> {
        let mut state = self.state.lock().await;
        if state
            .orders
            .values()
            .any(|o| o.reference == order.reference)
        {
            return Err(SwapError::Validation(format!(
                "duplicate reference: {}",
                order.reference
            )));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SwapOrder>, SwapError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<SwapOrder>, SwapError> {
        Ok(self
            .state
            .lock()
            .await
            .orders
            .values()
            .find(|o| o.reference == reference)
            .cloned())
    }

    async fn mark_processing(&self, id: Uuid, tx_hash: &str) -> Result<bool, SwapError> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Processing;
                order.transaction_hash = Some(tx_hash.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: Uuid, _error: &str) -> Result<bool, SwapError> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Failed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_and_settle(
        &self,
        id: Uuid,
        update: &CompletionUpdate,
        stx: &SettlementTransaction,
    ) -> Result<bool, SwapError> {
        if self.fail_next_completion.swap(false, Ordering::SeqCst) {
            return Err(SwapError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut state = self.state.lock().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status.is_matchable() => {
                order.status = OrderStatus::Completed;
                order.to_amount = Some(update.to_amount);
                order.fee = update.fee;
                order.block_number = Some(update.block_number);
                order.transaction_hash = Some(update.transaction_hash.clone());
                order.completed_at = Some(update.completed_at);
            }
            _ => return Ok(false),
        }

        // Same critical section as the status write, mirroring the
        // transactional pair in PgOrderStore
        match state.settlements.get_mut(&stx.reference) {
            Some(existing) => {
                existing.status = stx.status;
                existing.transaction_hash = stx.transaction_hash.clone();
                existing.block_number = stx.block_number;
            }
            None => {
                state.settlements.insert(stx.reference.clone(), stx.clone());
            }
        }
        Ok(true)
    }

    async fn mark_payout_failed(&self, id: Uuid, _error: &str) -> Result<bool, SwapError> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Completed => {
                order.status = OrderStatus::PayoutFailed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_payout_recovered(&self, id: Uuid) -> Result<bool, SwapError> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::PayoutFailed => {
                order.status = OrderStatus::Completed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_oldest_matchable(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<Option<SwapOrder>, SwapError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.status.is_matchable()
                    && o.from_currency == from_currency
                    && o.to_currency == to_currency
            })
            .min_by_key(|o| o.created_at)
            .cloned())
    }

    async fn upsert_settlement(&self, stx: &SettlementTransaction) -> Result<bool, SwapError> {
        let mut state = self.state.lock().await;
        match state.settlements.get_mut(&stx.reference) {
            Some(existing) => {
                // No-op update: amount and linkage are immutable, only the
                // confirmation fields refresh
                existing.status = stx.status;
                existing.transaction_hash = stx.transaction_hash.clone();
                existing.block_number = stx.block_number;
            }
            None => {
                state.settlements.insert(stx.reference.clone(), stx.clone());
            }
        }
        Ok(true)
    }

    async fn get_settlement(
        &self,
        reference: &str,
    ) -> Result<Option<SettlementTransaction>, SwapError> {
        Ok(self.state.lock().await.settlements.get(reference).cloned())
    }

    async fn update_settlement_status(
        &self,
        reference: &str,
        status: SettlementStatus,
    ) -> Result<bool, SwapError> {
        let mut state = self.state.lock().await;
        match state.settlements.get_mut(reference) {
            Some(stx) => {
                stx.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_liquidity_delta(
        &self,
        symbol: &str,
        delta: Decimal,
        block_number: i64,
        transaction_hash: &str,
    ) -> Result<(), SwapError> {
        let mut state = self.state.lock().await;
        *state.liquidity.entry(symbol.to_string()).or_default() += delta;
        state.liquidity_history.push((
            symbol.to_string(),
            delta,
            block_number,
            transaction_hash.to_string(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::types::{SwapDirection, SwapIntent};
    use rust_decimal::Decimal;

    fn pending_order(reference: &str) -> SwapOrder {
        let intent = SwapIntent {
            user_id: 1,
            from_currency: "USDC".into(),
            to_currency: "NGN".into(),
            from_amount: Decimal::from(300),
            rate: Decimal::new(166667, 2),
            fee: Decimal::ZERO,
            user_address: "0xabc".into(),
            fiat_account: Some("acct".into()),
        };
        SwapOrder::new(&intent, SwapDirection::TokenToFiat, reference.into())
    }

    fn completion() -> CompletionUpdate {
        CompletionUpdate {
            to_amount: Decimal::from(487500),
            fee: Decimal::from(12501),
            block_number: 42,
            transaction_hash: "0xdead".into(),
            completed_at: Utc::now(),
        }
    }

    fn settlement_for(order: &SwapOrder) -> SettlementTransaction {
        SettlementTransaction {
            swap_order_id: Some(order.id),
            reference: order.reference.clone(),
            currency: order.to_currency.clone(),
            amount: Decimal::from(487500),
            status: SettlementStatus::Confirmed,
            transaction_hash: Some("0xdead".into()),
            block_number: Some(42),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_cas_processing_only_from_pending() {
        let store = MemoryOrderStore::new();
        let order = pending_order("r1");
        store.create(&order).await.unwrap();

        assert!(store.mark_processing(order.id, "0x1").await.unwrap());
        // Second trigger refused
        assert!(!store.mark_processing(order.id, "0x2").await.unwrap());

        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(stored.transaction_hash.as_deref(), Some("0x1"));
    }

    #[tokio::test]
    async fn test_memory_complete_once() {
        let store = MemoryOrderStore::new();
        let order = pending_order("r2");
        store.create(&order).await.unwrap();
        store.mark_processing(order.id, "0x1").await.unwrap();

        let stx = settlement_for(&order);
        assert!(store.complete_and_settle(order.id, &completion(), &stx).await.unwrap());
        // Replay is a no-op and never adds a second settlement
        assert!(!store.complete_and_settle(order.id, &completion(), &stx).await.unwrap());

        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.to_amount, Some(Decimal::from(487500)));
        assert_eq!(store.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_memory_payout_failed_is_rematchable() {
        let store = MemoryOrderStore::new();
        let order = pending_order("r3");
        let stx = settlement_for(&order);
        store.create(&order).await.unwrap();
        store.complete_and_settle(order.id, &completion(), &stx).await.unwrap();
        assert!(store.mark_payout_failed(order.id, "rail down").await.unwrap());

        // A retriggering event can re-complete from payout_failed
        assert!(store.complete_and_settle(order.id, &completion(), &stx).await.unwrap());
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(store.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_memory_completion_failure_writes_nothing() {
        let store = MemoryOrderStore::new();
        let order = pending_order("r4");
        store.create(&order).await.unwrap();
        store.mark_processing(order.id, "0x1").await.unwrap();

        let stx = settlement_for(&order);
        store.fail_next_completion();
        assert!(store
            .complete_and_settle(order.id, &completion(), &stx)
            .await
            .is_err());

        // Neither side of the pair landed: the order is still matchable
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(store.settlement_count().await, 0);

        // The next attempt completes and settles together
        assert!(store.complete_and_settle(order.id, &completion(), &stx).await.unwrap());
        assert_eq!(store.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_memory_duplicate_reference_rejected() {
        let store = MemoryOrderStore::new();
        let a = pending_order("same-ref");
        let b = pending_order("same-ref");
        store.create(&a).await.unwrap();
        assert!(store.create(&b).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_settlement_upsert_no_second_row() {
        let store = MemoryOrderStore::new();
        let stx = SettlementTransaction {
            swap_order_id: None,
            reference: "dep-1".into(),
            currency: "USDC".into(),
            amount: Decimal::from(100),
            status: SettlementStatus::Confirmed,
            transaction_hash: Some("0x1".into()),
            block_number: Some(10),
            created_at: Utc::now(),
        };
        store.upsert_settlement(&stx).await.unwrap();
        store.upsert_settlement(&stx).await.unwrap();
        assert_eq!(store.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_memory_fifo_oldest_first() {
        let store = MemoryOrderStore::new();
        let mut older = pending_order("old");
        older.created_at = Utc::now() - chrono::Duration::seconds(60);
        let newer = pending_order("new");
        store.create(&newer).await.unwrap();
        store.create(&older).await.unwrap();

        let found = store
            .find_oldest_matchable("USDC", "NGN")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.reference, "old");
    }
}
