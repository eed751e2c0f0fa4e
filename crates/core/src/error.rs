//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// preconditions, invariants). Storage and cache failures belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive amount, too many decimal places).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Freeze / payout / commission asked for more than the available (CASH) balance.
    #[error("insufficient available balance: requested {requested}, available {available}")]
    InsufficientAvailable { requested: Decimal, available: Decimal },

    /// Unfreeze asked for more than is currently frozen.
    #[error("insufficient frozen balance: requested {requested}, frozen {frozen}")]
    InsufficientFrozen { requested: Decimal, frozen: Decimal },

    /// A ledger invariant was violated (e.g. an unbalanced posting).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Attempt to update or delete an existing ledger entry.
    ///
    /// This is a programming error, never a user-facing condition.
    #[error("ledger entries are immutable: {0}")]
    ImmutabilityViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn immutable(msg: impl Into<String>) -> Self {
        Self::ImmutabilityViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Caller-recoverable rejection raised before anything was written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InsufficientAvailable { .. } | Self::InsufficientFrozen { .. }
        )
    }
}
