//! Exchange Rate Source
//!
//! Read-only rate snapshots used exclusively to recompute settlement
//! amounts at confirmation time. Rates are quoted against a common base
//! currency; a pair rate is `rate(from) / rate(to)`.
//!
//! The snapshot may be cached with a short TTL since it is read-only shared
//! state (the order record is the only mutable shared resource).

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RateError {
    #[error("Rate source unavailable: {0}")]
    Unavailable(String),

    #[error("No rate for symbol: {0}")]
    MissingSymbol(String),

    #[error("Zero rate for symbol: {0}")]
    ZeroRate(String),
}

#[async_trait]
pub trait RateSource: Send + Sync + Debug {
    /// Current rates for the requested symbols, quoted against the common
    /// base currency
    async fn get_rates(&self, symbols: &[&str]) -> Result<HashMap<String, Decimal>, RateError>;
}

/// Cross rate between two symbols from a base-quoted snapshot
pub fn pair_rate(
    rates: &HashMap<String, Decimal>,
    from: &str,
    to: &str,
) -> Result<Decimal, RateError> {
    let from_rate = rates
        .get(from)
        .ok_or_else(|| RateError::MissingSymbol(from.to_string()))?;
    let to_rate = rates
        .get(to)
        .ok_or_else(|| RateError::MissingSymbol(to.to_string()))?;
    if to_rate.is_zero() {
        return Err(RateError::ZeroRate(to.to_string()));
    }
    Ok(from_rate / to_rate)
}

/// Static rate source for tests and local wiring
#[derive(Debug, Default)]
pub struct FixedRateSource {
    rates: HashMap<String, Decimal>,
}

impl FixedRateSource {
    pub fn new(rates: HashMap<String, Decimal>) -> Self {
        Self { rates }
    }

    pub fn with_rate(mut self, symbol: &str, rate: Decimal) -> Self {
        self.rates.insert(symbol.to_string(), rate);
        self
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn get_rates(&self, symbols: &[&str]) -> Result<HashMap<String, Decimal>, RateError> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let rate = self
                .rates
                .get(*symbol)
                .ok_or_else(|| RateError::MissingSymbol(symbol.to_string()))?;
            out.insert(symbol.to_string(), *rate);
        }
        Ok(out)
    }
}

/// TTL cache over an upstream rate source
///
/// Each symbol carries its own fetch timestamp; a partial refresh restamps
/// only the symbols it fetched, so previously-cached symbols keep their own
/// freshness window.
#[derive(Debug)]
pub struct CachedRateSource {
    inner: Arc<dyn RateSource>,
    ttl: Duration,
    cache: RwLock<HashMap<String, (Instant, Decimal)>>,
}

impl CachedRateSource {
    pub fn new(inner: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateSource for CachedRateSource {
    async fn get_rates(&self, symbols: &[&str]) -> Result<HashMap<String, Decimal>, RateError> {
        {
            let cache = self.cache.read().await;
            let mut out = HashMap::with_capacity(symbols.len());
            let mut all_fresh = true;
            for symbol in symbols {
                match cache.get(*symbol) {
                    Some((fetched_at, rate)) if fetched_at.elapsed() < self.ttl => {
                        out.insert(symbol.to_string(), *rate);
                    }
                    _ => {
                        all_fresh = false;
                        break;
                    }
                }
            }
            if all_fresh {
                return Ok(out);
            }
        }

        let fresh = self.inner.get_rates(symbols).await?;
        debug!(symbols = ?symbols, "Refreshed rate snapshot");

        let now = Instant::now();
        let mut cache = self.cache.write().await;
        for (symbol, rate) in &fresh {
            cache.insert(symbol.clone(), (now, *rate));
        }

        Ok(fresh)
    }
}
