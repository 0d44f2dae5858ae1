//! Order Orchestrator
//!
//! Validates swap intents, submits accepted orders to the external ledger,
//! and drives the forward-only lifecycle `pending -> processing`. Completion
//! happens elsewhere: once a ledger call is dispatched it is fire-and-forget
//! here, with the outcome learned through the event feed.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use ulid::Ulid;
use uuid::Uuid;

use crate::currency::{self, CurrencyRegistry};
use crate::felt;
use crate::ledger_client::{LedgerClient, LedgerError};
use crate::payout::{PayoutClient, PayoutError};
use crate::rates::{pair_rate, RateSource};

use super::error::SwapError;
use super::store::OrderStore;
use super::types::{OrderStatus, SwapDirection, SwapIntent, SwapOrder};

/// Orchestrator wiring that does not vary per request
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Swap contract address on the external ledger
    pub contract_address: String,
    /// Contract entrypoint for swap submission
    pub swap_entrypoint: String,
    /// Protocol fee in basis points, applied at settlement
    pub fee_bps: u32,
    /// Bound on ledger submission calls
    pub ledger_timeout: Duration,
    /// Bound on fiat rail calls (charge, payout retry)
    pub payout_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            swap_entrypoint: "execute_swap".to_string(),
            fee_bps: 50,
            ledger_timeout: Duration::from_secs(30),
            payout_timeout: Duration::from_secs(15),
        }
    }
}

/// Drives swap orders from intent to ledger submission
pub struct SwapOrchestrator {
    store: Arc<dyn OrderStore>,
    ledger: Arc<dyn LedgerClient>,
    rates: Arc<dyn RateSource>,
    payment: Arc<dyn PayoutClient>,
    registry: Arc<CurrencyRegistry>,
    config: OrchestratorConfig,
}

impl SwapOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        ledger: Arc<dyn LedgerClient>,
        rates: Arc<dyn RateSource>,
        payment: Arc<dyn PayoutClient>,
        registry: Arc<CurrencyRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            rates,
            payment,
            registry,
            config,
        }
    }

    /// Validate an intent and persist it as a pending order
    pub async fn create_order(&self, intent: SwapIntent) -> Result<SwapOrder, SwapError> {
        let direction = self.direction_of(&intent.from_currency, &intent.to_currency)?;

        currency::validate_amount(intent.from_amount, &intent.from_currency, &self.registry)?;

        if intent.rate <= Decimal::ZERO {
            return Err(SwapError::Validation("rate must be positive".into()));
        }
        if intent.fee.is_sign_negative() {
            return Err(SwapError::Validation("fee must not be negative".into()));
        }
        if intent.user_address.is_empty() {
            return Err(SwapError::Validation("missing user address".into()));
        }

        let reference = Ulid::new().to_string();
        let order = SwapOrder::new(&intent, direction, reference);
        self.store.create(&order).await?;

        info!(
            order_id = %order.id,
            reference = %order.reference,
            "Order created: {} {} -> {} amount={}",
            order.direction,
            order.from_currency,
            order.to_currency,
            order.from_amount
        );

        Ok(order)
    }

    /// Run pre-flight checks and submit the order to the ledger
    ///
    /// Idempotent trigger: refuses any order not currently `pending`, and
    /// the CAS to `processing` closes the race window between two workers
    /// passing that check simultaneously.
    pub async fn execute_swap(&self, order_id: Uuid) -> Result<SwapOrder, SwapError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or(SwapError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::Pending {
            return Err(SwapError::InvalidStatus {
                order_id,
                status: order.status,
            });
        }

        match order.direction {
            SwapDirection::FiatToToken => self.preflight_fiat_to_token(&order).await?,
            SwapDirection::TokenToFiat => self.preflight_token_to_fiat(&order).await?,
        }

        let tx_hash = self.submit_to_ledger(&order).await?;

        if !self.store.mark_processing(order.id, &tx_hash).await? {
            // Another worker moved the order first; the submission outcome
            // will be reconciled through the event feed either way
            warn!(
                order_id = %order.id,
                "Order left pending during submission, skipping transition"
            );
        } else {
            info!(
                order_id = %order.id,
                transaction_hash = %tx_hash,
                "Order processing, awaiting on-chain confirmation"
            );
        }

        self.store
            .get(order.id)
            .await?
            .ok_or(SwapError::OrderNotFound(order.id))
    }

    /// Re-dispatch the payout leg for an order stuck in `payout_failed`
    pub async fn retry_payout(&self, order_id: Uuid) -> Result<SwapOrder, SwapError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or(SwapError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::PayoutFailed {
            return Err(SwapError::InvalidStatus {
                order_id,
                status: order.status,
            });
        }

        let amount = order
            .to_amount
            .ok_or_else(|| SwapError::Payout("order has no settled amount".into()))?;
        let destination = order
            .fiat_account
            .as_deref()
            .ok_or_else(|| SwapError::Payout("missing payout account".into()))?;

        let payout_call = self
            .payment
            .initiate_payout(destination, amount, &order.to_currency);
        match tokio::time::timeout(self.config.payout_timeout, payout_call).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(SwapError::Payout(e.to_string())),
            // Order stays payout_failed, retryable again later
            Err(_) => return Err(SwapError::Payout("payout timed out".into())),
        }

        self.store.mark_payout_recovered(order.id).await?;
        info!(order_id = %order.id, "Payout retry succeeded");

        self.store
            .get(order.id)
            .await?
            .ok_or(SwapError::OrderNotFound(order.id))
    }

    /// Exactly one side must be fiat; direction follows from which one
    fn direction_of(&self, from: &str, to: &str) -> Result<SwapDirection, SwapError> {
        let from_fiat = self.registry.is_fiat(from)?;
        let to_fiat = self.registry.is_fiat(to)?;
        match (from_fiat, to_fiat) {
            (true, false) => Ok(SwapDirection::FiatToToken),
            (false, true) => Ok(SwapDirection::TokenToFiat),
            _ => Err(SwapError::Validation(format!(
                "unsupported pair: {} -> {}",
                from, to
            ))),
        }
    }

    /// Fiat->token: the user must have a registered receiving address and a
    /// funded fiat source; the fiat leg is charged before submission
    async fn preflight_fiat_to_token(&self, order: &SwapOrder) -> Result<(), SwapError> {
        let registered = self
            .ledger
            .is_registered(&order.user_address)
            .await
            .map_err(map_ledger_error)?;
        if !registered {
            let msg = format!("address {} not registered", order.user_address);
            self.store.mark_failed(order.id, &msg).await?;
            return Err(SwapError::Validation(msg));
        }

        let source = match order.fiat_account.as_deref() {
            Some(account) => account,
            None => {
                let msg = "missing fiat source account".to_string();
                self.store.mark_failed(order.id, &msg).await?;
                return Err(SwapError::Validation(msg));
            }
        };

        // The order's reference doubles as the charge idempotency key, so a
        // retried pre-flight after a transient submit failure cannot charge
        // the source twice
        let charge_call = self.payment.charge(
            source,
            order.from_amount,
            &order.from_currency,
            &order.reference,
        );
        match tokio::time::timeout(self.config.payout_timeout, charge_call).await {
            Ok(Ok(receipt)) => {
                info!(
                    order_id = %order.id,
                    charge_reference = %receipt.reference,
                    "Fiat charge accepted"
                );
                Ok(())
            }
            Ok(Err(PayoutError::Network(msg))) => {
                // Charge outcome unknown: leave the order pending, retryable
                Err(SwapError::Payout(msg))
            }
            Ok(Err(e)) => {
                self.store.mark_failed(order.id, &e.to_string()).await?;
                Err(SwapError::InsufficientFunds(e.to_string()))
            }
            Err(_) => {
                // Same as a network failure: outcome unknown, order stays
                // pending and the rail dedups the retried charge
                warn!(
                    order_id = %order.id,
                    "Fiat charge timed out, order stays pending"
                );
                Err(SwapError::Payout("charge timed out".into()))
            }
        }
    }

    /// Token->fiat: the on-chain balance must cover the swap and the fiat
    /// side must have liquidity for the projected payout, both checked
    /// before the ledger call
    async fn preflight_token_to_fiat(&self, order: &SwapOrder) -> Result<(), SwapError> {
        let balance = self
            .ledger
            .get_onchain_balance(&order.user_address, &order.from_currency)
            .await
            .map_err(map_ledger_error)?;
        if balance < order.from_amount {
            let msg = format!(
                "on-chain balance {} below requested {}",
                balance, order.from_amount
            );
            self.store.mark_failed(order.id, &msg).await?;
            return Err(SwapError::InsufficientFunds(msg));
        }

        let projected = self.projected_payout(order).await?;
        let liquidity = self
            .payment
            .get_liquidity(&order.to_currency)
            .await
            .map_err(|e| SwapError::Payout(e.to_string()))?;
        if liquidity < projected {
            let msg = format!(
                "fiat liquidity {} below projected payout {}",
                liquidity, projected
            );
            self.store.mark_failed(order.id, &msg).await?;
            return Err(SwapError::InsufficientFunds(msg));
        }

        Ok(())
    }

    /// Projected fiat payout at current rates, net of the protocol fee
    async fn projected_payout(&self, order: &SwapOrder) -> Result<Decimal, SwapError> {
        let rates = self
            .rates
            .get_rates(&[&order.from_currency, &order.to_currency])
            .await
            .map_err(|e| SwapError::Rates(e.to_string()))?;
        let rate = pair_rate(&rates, &order.from_currency, &order.to_currency)
            .map_err(|e| SwapError::Rates(e.to_string()))?;

        let fee_fraction = Decimal::from(self.config.fee_bps) / Decimal::from(10_000u32);
        let gross = order.from_amount * rate;
        currency::round_to_scale(
            gross * (Decimal::ONE - fee_fraction),
            &order.to_currency,
            &self.registry,
        )
        .map_err(SwapError::from)
    }

    /// Submit the encoded swap call, bounded by the configured timeout
    ///
    /// A timeout leaves the order `pending`: the call may still land, and
    /// the event feed remains able to reconcile it.
    async fn submit_to_ledger(&self, order: &SwapOrder) -> Result<String, SwapError> {
        let amount_units =
            currency::to_smallest_unit(order.from_amount, &order.from_currency, &self.registry)?;

        let calldata = vec![
            order.user_address.clone(),
            felt::encode_order_id(&order.id),
            order.from_currency.clone(),
            order.to_currency.clone(),
            amount_units.to_string(),
        ];

        let submission = self.ledger.submit(
            &self.config.contract_address,
            &self.config.swap_entrypoint,
            &calldata,
        );

        match tokio::time::timeout(self.config.ledger_timeout, submission).await {
            Ok(Ok(tx_hash)) => Ok(tx_hash),
            Ok(Err(e)) => Err(map_ledger_error(e)),
            Err(_) => {
                warn!(
                    order_id = %order.id,
                    "Ledger submission timed out, order stays pending for reconciliation"
                );
                Err(SwapError::TransientLedger("submission timed out".into()))
            }
        }
    }
}

fn map_ledger_error(e: LedgerError) -> SwapError {
    match e {
        LedgerError::Network(msg) => SwapError::TransientLedger(msg),
        LedgerError::Timeout => SwapError::TransientLedger("ledger timeout".into()),
        LedgerError::Rejected(msg) => SwapError::TransientLedger(format!("rejected: {}", msg)),
        LedgerError::UnknownAsset(sym) => SwapError::Validation(format!("unknown asset: {}", sym)),
    }
}
