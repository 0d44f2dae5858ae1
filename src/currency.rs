//! Currency Precision Library
//!
//! Unified fixed-point arithmetic for every amount in the system. All
//! parsing, rounding and smallest-unit conversion MUST go through this
//! module; no other component is allowed to make a rounding decision.
//!
//! ## Design Principles
//! 1. Single Source of Truth: `CurrencyRegistry` provides all decimal scales
//! 2. Explicit Error Handling: no silent truncation
//! 3. Round-half-up at the currency scale, applied once per operation
//!
//! ## Representation
//! - Major units are `rust_decimal::Decimal`, never binary floats
//! - Smallest units (kobo, wei, ...) are `u128`, floored on the way down
//! - The scale factor is `10^decimals` per currency

use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use std::collections::HashMap;
use thiserror::Error;

/// Currency conversion and arithmetic errors
#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("Unsupported currency: {0}")]
    Unsupported(String),

    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Division by zero")]
    DivisionByZero,
}

/// Static configuration for one supported currency
#[derive(Debug, Clone)]
pub struct CurrencyInfo {
    pub symbol: String,
    /// Decimal scale: 2 for most fiat, 0 for zero-decimal fiat, 6-18 for tokens
    pub decimals: u32,
    pub is_fiat: bool,
}

/// Symbol -> scale registry, the authoritative source for decimal configuration
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: HashMap<String, CurrencyInfo>,
}

impl CurrencyRegistry {
    /// Empty registry (for custom wiring in tests)
    pub fn new() -> Self {
        Self {
            currencies: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the production currency set
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (symbol, decimals, is_fiat) in [
            ("NGN", 2, true),
            ("USD", 2, true),
            ("KES", 2, true),
            ("GHS", 2, true),
            ("XOF", 0, true), // zero-decimal fiat
            ("USDC", 6, false),
            ("USDT", 6, false),
            ("STRK", 18, false),
            ("ETH", 18, false),
        ] {
            registry.register(CurrencyInfo {
                symbol: symbol.to_string(),
                decimals,
                is_fiat,
            });
        }
        registry
    }

    pub fn register(&mut self, info: CurrencyInfo) {
        self.currencies.insert(info.symbol.clone(), info);
    }

    pub fn get(&self, symbol: &str) -> Result<&CurrencyInfo, CurrencyError> {
        self.currencies
            .get(symbol)
            .ok_or_else(|| CurrencyError::Unsupported(symbol.to_string()))
    }

    pub fn is_supported(&self, symbol: &str) -> bool {
        self.currencies.contains_key(symbol)
    }

    pub fn scale(&self, symbol: &str) -> Result<u32, CurrencyError> {
        Ok(self.get(symbol)?.decimals)
    }

    pub fn is_fiat(&self, symbol: &str) -> Result<bool, CurrencyError> {
        Ok(self.get(symbol)?.is_fiat)
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// Parse: external string -> validated Decimal
// ============================================================================

/// Parse a client amount string for a currency, rejecting excess precision
///
/// # Errors
/// * `PrecisionOverflow` - more decimal places than the currency allows
/// * `InvalidAmount` - zero or negative
/// * `InvalidFormat` - not a plain fixed-point number
pub fn parse_amount(
    amount_str: &str,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<Decimal, CurrencyError> {
    registry.scale(symbol)?;
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(CurrencyError::InvalidFormat("empty string".into()));
    }
    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(CurrencyError::InvalidAmount);
    }
    // Strict fixed-point only: no exponent, no separators
    if amount_str
        .chars()
        .any(|c| !c.is_ascii_digit() && c != '.')
    {
        return Err(CurrencyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    let amount = Decimal::from_str(amount_str)
        .map_err(|e| CurrencyError::InvalidFormat(e.to_string()))?;

    validate_amount(amount, symbol, registry)?;
    Ok(amount)
}

/// Validate an already-deserialized Decimal against a currency's scale
pub fn validate_amount(
    amount: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<(), CurrencyError> {
    let decimals = registry.scale(symbol)?;

    if amount.is_sign_negative() || amount.is_zero() {
        return Err(CurrencyError::InvalidAmount);
    }
    // normalize() drops trailing zeros so "1.2300" at scale 2 passes
    if amount.normalize().scale() > decimals {
        return Err(CurrencyError::PrecisionOverflow {
            provided: amount.normalize().scale(),
            max: decimals,
        });
    }
    Ok(())
}

// ============================================================================
// Arithmetic: checked, with post-operation rounding at the currency scale
// ============================================================================

/// Round a raw Decimal to the currency's scale, half-up
pub fn round_to_scale(
    value: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<Decimal, CurrencyError> {
    let decimals = registry.scale(symbol)?;
    Ok(value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero))
}

pub fn add(
    a: Decimal,
    b: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<Decimal, CurrencyError> {
    let sum = a.checked_add(b).ok_or(CurrencyError::Overflow)?;
    round_to_scale(sum, symbol, registry)
}

pub fn sub(
    a: Decimal,
    b: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<Decimal, CurrencyError> {
    let diff = a.checked_sub(b).ok_or(CurrencyError::Overflow)?;
    round_to_scale(diff, symbol, registry)
}

pub fn mul(
    a: Decimal,
    b: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<Decimal, CurrencyError> {
    let product = a.checked_mul(b).ok_or(CurrencyError::Overflow)?;
    round_to_scale(product, symbol, registry)
}

pub fn div(
    a: Decimal,
    b: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<Decimal, CurrencyError> {
    if b.is_zero() {
        return Err(CurrencyError::DivisionByZero);
    }
    let quotient = a.checked_div(b).ok_or(CurrencyError::Overflow)?;
    round_to_scale(quotient, symbol, registry)
}

// ============================================================================
// Smallest unit <-> major unit
// ============================================================================

/// Convert a major-unit amount to smallest units (kobo, wei), flooring
///
/// Flooring is deliberate: fractional smallest units are never rounded up
/// when heading on-chain.
pub fn to_smallest_unit(
    amount: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<u128, CurrencyError> {
    let decimals = registry.scale(symbol)?;
    if amount.is_sign_negative() {
        return Err(CurrencyError::InvalidAmount);
    }
    let multiplier = Decimal::from(10u64.pow(decimals));
    let scaled = amount
        .checked_mul(multiplier)
        .ok_or(CurrencyError::Overflow)?;
    scaled.trunc().to_u128().ok_or(CurrencyError::Overflow)
}

/// Convert smallest units back to a major-unit Decimal
pub fn from_smallest_unit(
    units: u128,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<Decimal, CurrencyError> {
    let decimals = registry.scale(symbol)?;
    let signed = i128::try_from(units).map_err(|_| CurrencyError::Overflow)?;
    Decimal::try_from_i128_with_scale(signed, decimals).map_err(|_| CurrencyError::Overflow)
}

// ============================================================================
// Format: Decimal -> canonical fixed-point string for external responses
// ============================================================================

/// Canonical formatter: always a fixed-point string at the currency's scale
pub fn format_amount(
    amount: Decimal,
    symbol: &str,
    registry: &CurrencyRegistry,
) -> Result<String, CurrencyError> {
    let decimals = registry.scale(symbol)?;
    let rounded = round_to_scale(amount, symbol, registry)?;
    Ok(format!("{:.prec$}", rounded, prec = decimals as usize))
}

// ============================================================================
// Unit Tests
// ============================================================================
