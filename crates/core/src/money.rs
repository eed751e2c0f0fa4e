//! Fixed-point money helpers.
//!
//! All amounts are `rust_decimal::Decimal` with at most [`MONEY_SCALE`] fractional
//! digits. Floating point never enters the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Number of fractional digits stored for every amount.
pub const MONEY_SCALE: u32 = 2;

/// Exclusive upper bound of a single amount: `10^16`, the integer capacity of
/// the `NUMERIC(18,2)` amount column.
///
/// With every entry below this bound, summing all entries of an account stays
/// far inside `Decimal`'s range (about `7.9 * 10^28`), so balance arithmetic
/// can't overflow.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x6FC1_0000, 0x0023_86F2, 0, false, 0);

/// Currency used when the caller does not name one.
pub const DEFAULT_CURRENCY: &str = "RUB";

/// ISO 4217 currency code (upper-case, three letters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency must be a three-letter ISO code, got '{code}'"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self(DEFAULT_CURRENCY.to_string())
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Namespace for amount validation and arithmetic used by the ledger.
pub struct Money;

impl Money {
    /// Validate a posting amount: strictly positive, below [`MAX_AMOUNT`], at
    /// most two decimal places.
    ///
    /// Returns the amount rescaled to exactly [`MONEY_SCALE`] digits.
    pub fn positive(amount: Decimal) -> DomainResult<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be positive"));
        }
        if amount >= MAX_AMOUNT {
            return Err(DomainError::validation(format!(
                "amount {amount} exceeds the ledger maximum (must be below {MAX_AMOUNT})"
            )));
        }
        let normalized = amount.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(DomainError::validation(format!(
                "amount {amount} has more than {MONEY_SCALE} decimal places"
            )));
        }
        let mut scaled = normalized;
        scaled.rescale(MONEY_SCALE);
        Ok(scaled)
    }

    /// `max(value, 0)` rescaled to [`MONEY_SCALE`].
    pub fn clamp_non_negative(value: Decimal) -> Decimal {
        let mut clamped = value.max(Decimal::ZERO);
        clamped.rescale(MONEY_SCALE);
        clamped
    }

    /// Zero with the ledger scale (`0.00`).
    pub fn zero() -> Decimal {
        Decimal::new(0, MONEY_SCALE)
    }
}
