//! Money Module
//!
//! Currency amounts are `rust_decimal::Decimal` values with at most
//! [`CURRENCY_DECIMALS`] fractional digits. All parsing, validation and
//! commission rounding MUST go through this module.
//!
//! ## Rules
//! 1. No silent truncation: inputs with more than 2 decimals are rejected
//! 2. Payment amounts are strictly positive
//! 3. Payment amounts never exceed [`MAX_AMOUNT`] (the `NUMERIC(12,2)` column)
//! 4. Commission amounts round half-up (away from zero) to 2 decimals
//! 5. Currency codes are trimmed and uppercased before anything compares them
//!
//! ## Usage
//! ```rust
//! use referral_ledger::money::{parse_amount, commission_amount, format_amount};
//! use rust_decimal::Decimal;
//! use std::str::FromStr;
//!
//! let paid = parse_amount("29.99").unwrap();
//! let rate = Decimal::from_str("0.10").unwrap();
//! assert_eq!(format_amount(commission_amount(paid, rate)), "3.00");
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Fractional digits of every stored currency amount
pub const CURRENCY_DECIMALS: u32 = 2;

/// Largest payment amount: 9_999_999_999.99
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid currency: {0:?}")]
    InvalidCurrency(String),
}

// ============================================================================
// Parse / Validate: Client → Internal
// ============================================================================

/// Parse a client-provided amount string ("29.99", "100")
///
/// # Errors
/// * `PrecisionOverflow` - more than 2 decimal places
/// * `InvalidAmount` - zero or signed input
/// * `InvalidFormat` - anything that is not `digits[.digits]`
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            // Both sides of the dot must be present: "0.5", never ".5" or "5."
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in whole part: {}",
            whole
        )));
    }
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in fractional part: {}",
            frac
        )));
    }

    if frac.len() > CURRENCY_DECIMALS as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: CURRENCY_DECIMALS,
        });
    }

    let amount = Decimal::from_str(amount_str).map_err(|e| {
        let err_str = e.to_string();
        if err_str.contains("overflow") || err_str.contains("too large") {
            MoneyError::Overflow
        } else {
            MoneyError::InvalidFormat(err_str)
        }
    })?;

    validate_amount(amount)
}

/// Validate an already-decoded payment amount (e.g. from JSON)
pub fn validate_amount(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }
    if amount > MAX_AMOUNT {
        return Err(MoneyError::Overflow);
    }

    // 10.50 and 10.5 are the same amount; only significant digits count
    let normalized = amount.normalize();
    if normalized.scale() > CURRENCY_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: CURRENCY_DECIMALS,
        });
    }

    Ok(to_currency_scale(amount))
}

/// Canonical form of a currency code: trimmed, ASCII uppercase, 2 to 10
/// alphanumerics (" usd" -> "USD")
pub fn normalize_currency(code: &str) -> Result<String, MoneyError> {
    let code = code.trim();
    let valid = (2..=10).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(MoneyError::InvalidCurrency(code.to_string()));
    }
    Ok(code.to_ascii_uppercase())
}

/// Sum of ledger amounts, `Overflow` instead of a panic
pub fn checked_sum<I>(values: I) -> Result<Decimal, MoneyError>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .ok_or(MoneyError::Overflow)
}

// ============================================================================
// Commission Arithmetic
// ============================================================================

/// Round to currency precision, half-up (away from zero)
#[inline]
pub fn round_currency(value: Decimal) -> Decimal {
    to_currency_scale(value.round_dp_with_strategy(
        CURRENCY_DECIMALS,
        RoundingStrategy::MidpointAwayFromZero,
    ))
}

/// `round(amount * rate, 2)`
#[inline]
pub fn commission_amount(amount: Decimal, rate: Decimal) -> Decimal {
    round_currency(amount * rate)
}

/// Pin the scale to exactly 2 so `10` and `10.00` render and store alike
fn to_currency_scale(value: Decimal) -> Decimal {
    let mut v = value;
    v.rescale(CURRENCY_DECIMALS);
    v
}

// ============================================================================
// Format: Internal → Client
// ============================================================================

/// Render an amount with exactly 2 decimals ("-3.50", "10.00")
pub fn format_amount(value: Decimal) -> String {
    format!("{:.prec$}", value, prec = CURRENCY_DECIMALS as usize)
}
